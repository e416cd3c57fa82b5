//! Pad and stream routing
//!
//! A fabric exposes its CSI links as the first pads and one pad per serial
//! link after them. On a deserializer data flows from link pads (sinks) to
//! CSI pads (sources); on a serializer the other way around. Each route
//! joins one (sink pad, stream) to one (source pad, stream).
//!
//! Enabling a route holds a reference on the CSI link behind it and
//! forwards the enable to whatever endpoint is connected behind the serial
//! link, typically a sensor or the route table of a remote serializer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::data::{PipeSource, RouteConfig};
use crate::error::{Result, SerdesError};
use crate::fabric::Fabric;

/// Frame descriptor entry describing one stream on a pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameDescEntry {
    pub stream: u32,
    pub vc: u8,
    pub dt: u8,
}

/// Consumer-facing stream control, implemented by sensors and by route
/// tables so fabrics can be chained
pub trait StreamEndpoint: Send + Sync {
    fn enable_stream(&self, pad: usize, stream: u32) -> Result<()>;
    fn disable_stream(&self, pad: usize, stream: u32) -> Result<()>;
    fn frame_desc(&self, pad: usize) -> Result<Vec<FrameDescEntry>>;
}

/// Route with both ends resolved to CSI side and link side
#[derive(Debug, Clone, Copy)]
struct Resolved {
    csi: usize,
    csi_stream: u32,
    link: usize,
    link_stream: u32,
}

struct Remote {
    endpoint: Arc<dyn StreamEndpoint>,
    pad: usize,
}

/// Static routes of one fabric and their activation state
pub struct RouteTable {
    fabric: Arc<Fabric>,
    routes: Vec<RouteConfig>,
    resolved: Vec<Resolved>,
    active: Mutex<HashSet<usize>>,
    remotes: RwLock<HashMap<usize, Remote>>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("fabric", &self.fabric.name())
            .field("routes", &self.routes)
            .field("active", &*self.active.lock())
            .finish()
    }
}

impl RouteTable {
    /// Build the table from the fabric's configured routes
    pub fn new(fabric: Arc<Fabric>) -> Result<Self> {
        let routes = fabric.config().routes.clone();
        Self::with_routes(fabric, routes)
    }

    pub fn with_routes(fabric: Arc<Fabric>, routes: Vec<RouteConfig>) -> Result<Self> {
        let desc = *fabric.descriptor();
        let csi_pads = desc.csi_links;
        let pads = desc.pads();

        let mut sinks = HashSet::new();
        let mut sources = HashSet::new();
        let mut resolved = Vec::with_capacity(routes.len());

        for route in &routes {
            Fabric::check_index("pad", route.sink_pad, pads)?;
            Fabric::check_index("pad", route.source_pad, pads)?;
            if !sinks.insert((route.sink_pad, route.sink_stream)) {
                return Err(SerdesError::config(format!(
                    "sink pad {} stream {} routed twice",
                    route.sink_pad, route.sink_stream
                )));
            }
            if !sources.insert((route.source_pad, route.source_stream)) {
                return Err(SerdesError::config(format!(
                    "source pad {} stream {} routed twice",
                    route.source_pad, route.source_stream
                )));
            }

            let (link_pad, link_stream, csi, csi_stream) = if desc.is_deserializer() {
                (route.sink_pad, route.sink_stream, route.source_pad, route.source_stream)
            } else {
                (route.source_pad, route.source_stream, route.sink_pad, route.sink_stream)
            };
            if csi >= csi_pads || link_pad < csi_pads {
                return Err(SerdesError::config(format!(
                    "route {} -> {} does not join a link pad to a CSI pad",
                    route.sink_pad, route.source_pad
                )));
            }
            resolved.push(Resolved {
                csi,
                csi_stream,
                link: link_pad - csi_pads,
                link_stream,
            });
        }

        Ok(Self {
            fabric,
            routes,
            resolved,
            active: Mutex::new(HashSet::new()),
            remotes: RwLock::new(HashMap::new()),
        })
    }

    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// Connect the endpoint behind serial link `link`; its pad `pad` receives
    /// the forwarded stream operations
    pub fn connect(&self, link: usize, endpoint: Arc<dyn StreamEndpoint>, pad: usize) -> Result<()> {
        Fabric::check_index("serial link", link, self.fabric.descriptor().serial_links)?;
        self.remotes.write().insert(link, Remote { endpoint, pad });
        Ok(())
    }

    /// Routes currently streaming
    pub fn active_routes(&self) -> Vec<RouteConfig> {
        let active = self.active.lock();
        let mut indices: Vec<usize> = active.iter().copied().collect();
        indices.sort_unstable();
        indices.into_iter().map(|i| self.routes[i]).collect()
    }

    fn find(&self, pad: usize, stream: u32) -> Result<usize> {
        self.routes
            .iter()
            .position(|r| (r.sink_pad, r.sink_stream) == (pad, stream) || (r.source_pad, r.source_stream) == (pad, stream))
            .ok_or_else(|| SerdesError::config(format!("no route for pad {} stream {}", pad, stream)))
    }

    fn remote(&self, link: usize) -> Option<(Arc<dyn StreamEndpoint>, usize)> {
        self.remotes.read().get(&link).map(|r| (Arc::clone(&r.endpoint), r.pad))
    }

    /// Remap a remote frame descriptor entry through the pipe maps of the
    /// pipes fed by `link`
    fn remap_vc(&self, link: usize, entry: FrameDescEntry) -> FrameDescEntry {
        let config = self.fabric.config();
        let mapped = config
            .pipes
            .iter()
            .filter(|p| matches!(p.source, PipeSource::Link { link: l, .. } if l == link))
            .flat_map(|p| p.maps.iter())
            .find(|m| m.src_vc == entry.vc && m.src_dt == entry.dt);
        match mapped {
            Some(m) => FrameDescEntry {
                vc: m.dst_vc,
                dt: m.dst_dt,
                ..entry
            },
            None => entry,
        }
    }
}

impl StreamEndpoint for RouteTable {
    fn enable_stream(&self, pad: usize, stream: u32) -> Result<()> {
        let index = self.find(pad, stream)?;
        let mut active = self.active.lock();
        if active.contains(&index) {
            return Ok(());
        }
        let route = self.resolved[index];

        self.fabric.enable_csi_link(route.csi)?;
        if let Some((endpoint, remote_pad)) = self.remote(route.link) {
            if let Err(e) = endpoint.enable_stream(remote_pad, route.link_stream) {
                warn!(link = route.link, stream = route.link_stream, error = %e, "Remote stream enable failed");
                if let Err(de) = self.fabric.disable_csi_link(route.csi) {
                    warn!(csi = route.csi, error = %de, "CSI release failed");
                }
                return Err(e);
            }
        }

        active.insert(index);
        debug!(csi = route.csi, link = route.link, stream = route.csi_stream, "Stream enabled");
        Ok(())
    }

    fn disable_stream(&self, pad: usize, stream: u32) -> Result<()> {
        let index = self.find(pad, stream)?;
        let mut active = self.active.lock();
        if !active.contains(&index) {
            return Ok(());
        }
        let route = self.resolved[index];

        if let Some((endpoint, remote_pad)) = self.remote(route.link) {
            endpoint.disable_stream(remote_pad, route.link_stream)?;
        }
        active.remove(&index);
        self.fabric.disable_csi_link(route.csi)?;
        debug!(csi = route.csi, link = route.link, stream = route.csi_stream, "Stream disabled");
        Ok(())
    }

    fn frame_desc(&self, pad: usize) -> Result<Vec<FrameDescEntry>> {
        let deserializer = self.fabric.descriptor().is_deserializer();
        let mut out = Vec::new();

        for (route, resolved) in self.routes.iter().zip(&self.resolved) {
            if route.sink_pad != pad && route.source_pad != pad {
                continue;
            }
            let Some((endpoint, remote_pad)) = self.remote(resolved.link) else {
                continue;
            };
            let stream_here = if route.sink_pad == pad { route.sink_stream } else { route.source_stream };

            for entry in endpoint.frame_desc(remote_pad)? {
                if entry.stream != resolved.link_stream {
                    continue;
                }
                let entry = FrameDescEntry { stream: stream_here, ..entry };
                out.push(if deserializer { self.remap_vc(resolved.link, entry) } else { entry });
            }
        }
        Ok(out)
    }
}
