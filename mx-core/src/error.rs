pub use mx_error::{Result, SerdesError};
