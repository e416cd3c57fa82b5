/*
 * Integration tests for max9x
 *
 * These tests drive whole fabrics against the simulator and check the
 * behavior that only shows up when isolation, translation, link bring-up
 * and power sequencing work together.
 */

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mockall::mock;
use serial_test::serial;

use max9x::commands::cmd_cycle;
use max9x::config::{board_path, example_board, load_board};
use mx_core::chip::{max9295, max96724, CommonOps, SerialLinkOps};
use mx_core::constants::regs;
use mx_core::fabric::remap;
use mx_core::{
    ChipDescriptor, ChipIo, ChipRegistry, CsiConfig, Fabric, FabricConfig, LinkConfig, LinkState,
    PipeConfig, PipeMap, PipeSource, RecordingClock, RegisterBus, Regulator, RemoteDeviceConfig,
    RouteConfig, RouteTable, SerdesChip, SerdesError, SimBus, SimConfig, SimDevice, SimRegulator,
    StreamEndpoint, TimingConfig,
};

mock! {
    pub Supply {}
    impl Regulator for Supply {
        fn enable(&self) -> mx_core::Result<()>;
        fn disable(&self) -> mx_core::Result<()>;
    }
}

// Test utilities
fn camera_link(virt_addr: u8, auto_enable: bool) -> LinkConfig {
    LinkConfig {
        auto_enable,
        remote: Some(RemoteDeviceConfig {
            name: format!("cam@{:02x}", virt_addr),
            phys_addr: 0x40,
            virt_addr,
            device_id: Some(max9295::DEVICE_ID),
        }),
        ..Default::default()
    }
}

fn camera_pipe(link: usize) -> PipeConfig {
    PipeConfig {
        source: PipeSource::Link { link, pipe: 0 },
        maps: vec![PipeMap {
            src_vc: 0,
            src_dt: 0x2C,
            dst_vc: link as u8,
            dst_dt: 0x2C,
            dst_csi: 0,
        }],
        dbl_pixel_bpp: 0,
        soft_min_bpp: 0,
        soft_max_bpp: 0,
    }
}

fn csi() -> CsiConfig {
    CsiConfig {
        lanes: 4,
        bus_type: Default::default(),
        freq_mhz: 1500,
        deskew: Default::default(),
    }
}

fn deserializer_config(links: Vec<LinkConfig>) -> FabricConfig {
    FabricConfig {
        name: "des0".into(),
        addr: 0x27,
        links,
        csi_links: vec![csi()],
        ..Default::default()
    }
}

fn bare_deserializer(links: usize) -> (Arc<SimBus>, Arc<Fabric>) {
    let bus = Arc::new(SimConfig::quad_deserializer(0).build());
    let config = deserializer_config((0..links).map(|_| LinkConfig { auto_enable: false, ..Default::default() }).collect());
    let fabric = Fabric::builder(config, bus.clone())
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();
    (bus, fabric)
}

/// MAX96724 whose serial link enable fails a set number of times
struct FlakyLinks {
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl SerdesChip for FlakyLinks {
    fn descriptor(&self) -> &ChipDescriptor {
        &max96724::DESCRIPTOR
    }

    fn common(&self) -> Option<&dyn CommonOps> {
        Some(&max96724::Max96724)
    }

    fn serial_link(&self) -> Option<&dyn SerialLinkOps> {
        Some(self)
    }
}

impl SerialLinkOps for FlakyLinks {
    fn enable(&self, io: ChipIo<'_>, link: usize, _config: &LinkConfig) -> mx_core::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SerdesError::io(io.addr(), 0x0006, format!("link {} did not train", link)));
        }
        Ok(())
    }
}

#[test]
fn test_reisolating_same_link_fails_fast() {
    let (_bus, fabric) = bare_deserializer(2);

    fabric.isolate_link(0).unwrap();
    let err = fabric.isolate_link(0).unwrap_err();
    assert!(matches!(err, SerdesError::AlreadyInProgress { link: 0 }));
    assert_eq!(fabric.isolated_link(), Some(0));

    fabric.deisolate_link(0).unwrap();
    assert_eq!(fabric.isolated_link(), None);
}

#[test]
fn test_isolation_blocks_other_link_until_released() {
    let (_bus, fabric) = bare_deserializer(2);
    fabric.isolate_link(0).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let waiter = {
        let fabric = fabric.clone();
        let done = done.clone();
        thread::spawn(move || {
            let result = fabric.isolate_link(1);
            done.store(true, Ordering::SeqCst);
            let isolated = fabric.isolated_link();
            fabric.deisolate_link(1).unwrap();
            result.map(|_| isolated)
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst), "isolate(1) ran while link 0 was isolated");

    fabric.deisolate_link(0).unwrap();
    assert_eq!(waiter.join().unwrap().unwrap(), Some(1));
}

#[test]
fn test_waiting_isolation_proceeds_within_poll_interval() {
    let bus = Arc::new(SimConfig::quad_deserializer(0).build());
    let mut config = deserializer_config(vec![LinkConfig { auto_enable: false, ..Default::default() }; 2]);
    config.timing.isolation_poll_ms = 200;
    let poll = config.timing.isolation_poll();
    let fabric = Fabric::builder(config, bus)
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();
    fabric.isolate_link(0).unwrap();

    let waiter = {
        let fabric = fabric.clone();
        thread::spawn(move || {
            let result = fabric.isolate_link(1);
            let proceeded = Instant::now();
            fabric.deisolate_link(1).unwrap();
            result.map(|_| proceeded)
        })
    };

    thread::sleep(Duration::from_millis(50));
    let released = Instant::now();
    fabric.deisolate_link(0).unwrap();

    let proceeded = waiter.join().unwrap().unwrap();
    let handover = proceeded.saturating_duration_since(released);
    assert!(handover < poll, "link 1 waited {:?} after release", handover);
}

#[test]
fn test_select_waits_for_isolation() {
    let (_bus, fabric) = bare_deserializer(2);
    fabric.isolate_link(0).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let waiter = {
        let fabric = fabric.clone();
        let done = done.clone();
        thread::spawn(move || {
            fabric.select_link(1).unwrap();
            done.store(true, Ordering::SeqCst);
            fabric.deselect_link(1).unwrap();
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));
    fabric.deisolate_link(0).unwrap();
    waiter.join().unwrap();
    assert_eq!(fabric.selected_link(), None);
}

#[test]
fn test_remap_twice_writes_once() {
    let bus = SimBus::new();
    bus.add_device(0x40, SimDevice::for_chip(max9295::DEVICE_ID));
    let clock = RecordingClock::new();
    let settle = Duration::from_millis(5);

    remap(None, ChipIo::new(&bus, 0x40), 0x42, &max9295::Max9295, settle, &clock).unwrap();
    let writes = bus.write_count();
    assert!(writes > 0);
    assert_eq!(ChipIo::new(&bus, 0x42).read_u8(regs::DEV_ID).unwrap(), max9295::DEVICE_ID);

    remap(None, ChipIo::new(&bus, 0x40), 0x42, &max9295::Max9295, settle, &clock).unwrap();
    assert_eq!(bus.write_count(), writes);
}

#[test]
fn test_csi_usecount_balanced() {
    let (_bus, fabric) = bare_deserializer(1);

    fabric.enable_csi_link(0).unwrap();
    fabric.enable_csi_link(0).unwrap();
    assert_eq!(fabric.csi_usecount(0).unwrap(), 2);

    fabric.disable_csi_link(0).unwrap();
    fabric.disable_csi_link(0).unwrap();
    assert_eq!(fabric.csi_usecount(0).unwrap(), 0);

    assert!(fabric.disable_csi_link(0).unwrap_err().is_config());
    assert_eq!(fabric.csi_usecount(0).unwrap(), 0);
}

#[test]
fn test_backoff_sleeps_double() {
    let bus = Arc::new(SimConfig::quad_deserializer(0).build());
    let chip = Arc::new(FlakyLinks {
        failures_left: AtomicU32::new(2),
        attempts: AtomicU32::new(0),
    });
    let clock = Arc::new(RecordingClock::new());
    let config = deserializer_config(vec![LinkConfig { auto_enable: false, ..Default::default() }]);

    let fabric = Fabric::builder(config, bus)
        .registry(ChipRegistry::empty().with(chip.clone()))
        .clock(clock.clone())
        .attach()
        .unwrap();
    clock.take();

    fabric.bring_up_link(0).unwrap();
    assert_eq!(clock.take(), vec![Duration::from_millis(32), Duration::from_millis(64)]);
    assert_eq!(chip.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(fabric.link_state(0).unwrap(), LinkState::Enabled);
}

#[test]
fn test_backoff_gives_up_after_ladder() {
    let bus = Arc::new(SimConfig::quad_deserializer(0).build());
    let chip = Arc::new(FlakyLinks {
        failures_left: AtomicU32::new(u32::MAX),
        attempts: AtomicU32::new(0),
    });
    let clock = Arc::new(RecordingClock::new());
    let config = deserializer_config(vec![LinkConfig { auto_enable: false, ..Default::default() }]);

    let fabric = Fabric::builder(config, bus)
        .registry(ChipRegistry::empty().with(chip.clone()))
        .clock(clock.clone())
        .attach()
        .unwrap();
    clock.take();

    assert!(fabric.bring_up_link(0).unwrap_err().is_io());
    let sleeps: Vec<u64> = clock.take().iter().map(|d| d.as_millis() as u64).collect();
    assert_eq!(sleeps, vec![32, 64, 128, 256, 512]);
    assert_eq!(chip.attempts.load(Ordering::SeqCst), 6);
    assert!(fabric.snapshot().links[0].failed);
    assert_eq!(fabric.link_state(0).unwrap(), LinkState::Disabled);
}

#[test]
fn test_identical_remotes_get_distinct_addresses() {
    let bus = Arc::new(SimConfig::quad_deserializer(2).build());
    let config = deserializer_config(vec![camera_link(0x42, true), camera_link(0x44, true)]);

    let fabric = Fabric::builder(config, bus.clone())
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();

    assert_eq!(fabric.enabled_links(), vec![0, 1]);
    assert_eq!(bus.remote_addr(0), Some(0x42));
    assert_eq!(bus.remote_addr(1), Some(0x44));
    assert!(bus.collisions().is_empty(), "collisions: {:?}", bus.collisions());
    assert!(fabric.snapshot().links.iter().all(|l| l.detected));
}

#[test]
fn test_factory_address_never_shared_on_live_links() {
    let bus = Arc::new(SimConfig::quad_deserializer(2).build());
    let supply = Arc::new(SimRegulator::new("vdd").powering(bus.clone()));
    let config = deserializer_config(vec![camera_link(0x42, true), camera_link(0x44, true)]);

    let fabric = Fabric::builder(config, bus.clone())
        .regulator(supply)
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();
    fabric.suspend().unwrap();
    fabric.resume().unwrap();
    fabric.disable_serial_link(1).unwrap();
    fabric.enable_serial_link(1).unwrap();

    // Every write to the link gate is checked for shared live addresses
    let gate_writes = bus
        .writes_to(0x27)
        .iter()
        .filter(|(reg, _)| *reg == max96724::REG_LINK_EN)
        .count();
    assert!(gate_writes >= 8, "only {} gate writes", gate_writes);
    assert!(bus.collisions().is_empty(), "collisions: {:?}", bus.collisions());
}

#[test]
fn test_absent_remote_leaves_no_link_isolated() {
    let bus = Arc::new(SimConfig::quad_deserializer(1).build());
    let config = deserializer_config(vec![camera_link(0x42, false), camera_link(0x44, false)]);
    let fabric = Fabric::builder(config, bus)
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();

    fabric.enable_serial_link(0).unwrap();
    let err = fabric.enable_serial_link(1).unwrap_err();
    assert!(err.is_not_present(), "unexpected error: {}", err);
    assert_eq!(fabric.isolated_link(), None);
    assert_eq!(fabric.selected_link(), None);

    let snapshot = fabric.snapshot();
    assert!(snapshot.links[0].detected);
    assert!(!snapshot.links[1].detected);

    fabric.disable_serial_link(1).unwrap();
    assert_eq!(fabric.link_state(1).unwrap(), LinkState::Disabled);
    // The other link is still reachable afterwards
    fabric.isolate_link(0).unwrap();
    fabric.deisolate_link(0).unwrap();
}

#[test]
fn test_suspend_resume_restores_links_and_routes() {
    let bus = Arc::new(SimConfig::quad_deserializer(2).build());
    let supply = Arc::new(SimRegulator::new("vdd").powering(bus.clone()));
    let clock = Arc::new(RecordingClock::new());
    let mut config = deserializer_config(vec![camera_link(0x42, true), camera_link(0x44, true)]);
    config.pipes = vec![camera_pipe(0), camera_pipe(1)];
    config.routes = vec![
        RouteConfig { sink_pad: 4, sink_stream: 0, source_pad: 0, source_stream: 0 },
        RouteConfig { sink_pad: 5, sink_stream: 0, source_pad: 0, source_stream: 1 },
    ];

    let fabric = Fabric::builder(config, bus.clone())
        .regulator(supply.clone())
        .clock(clock.clone())
        .attach()
        .unwrap();
    let routes = RouteTable::new(fabric.clone()).unwrap();
    routes.enable_stream(0, 0).unwrap();
    routes.enable_stream(0, 1).unwrap();

    let links = fabric.enabled_links();
    let usecount = fabric.csi_usecount(0).unwrap();
    assert_eq!(links, vec![0, 1]);
    // two pipes plus two streams
    assert_eq!(usecount, 4);

    fabric.suspend().unwrap();
    assert!(!fabric.is_powered());
    assert!(!bus.is_powered());
    assert_eq!(bus.remote_addr(0), Some(0x40));
    assert_eq!(fabric.csi_usecount(0).unwrap(), 2);

    bus.delay_ready(0x27, 10);
    clock.take();
    fabric.resume().unwrap();

    assert_eq!(fabric.enabled_links(), links);
    assert_eq!(fabric.csi_usecount(0).unwrap(), usecount);
    assert_eq!(routes.active_routes().len(), 2);
    assert_eq!(bus.remote_addr(0), Some(0x42));
    assert_eq!(bus.remote_addr(1), Some(0x44));
    assert_eq!(supply.enable_count(), 2);
    assert_eq!(supply.disable_count(), 1);

    let probe_sleeps = clock.take().iter().filter(|d| **d == Duration::from_millis(100)).count();
    assert!(probe_sleeps >= 10);
    assert!(bus.collisions().is_empty());
}

#[test]
fn test_resume_retry_after_slow_wakeup_restores_links() {
    let bus = Arc::new(SimConfig::quad_deserializer(2).build());
    let supply = Arc::new(SimRegulator::new("vdd").powering(bus.clone()));
    let config = deserializer_config(vec![camera_link(0x42, true), camera_link(0x44, true)]);
    let fabric = Fabric::builder(config, bus.clone())
        .regulator(supply.clone())
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();
    assert_eq!(fabric.enabled_links(), vec![0, 1]);

    fabric.suspend().unwrap();
    bus.delay_ready(0x27, TimingConfig::default().resume_probe_attempts + 5);

    let err = fabric.resume().unwrap_err();
    assert!(matches!(err, SerdesError::NotFound(_)), "unexpected error: {}", err);
    assert!(!fabric.is_powered());
    assert!(!bus.is_powered());
    assert_eq!(supply.enable_count(), supply.disable_count());

    fabric.resume().unwrap();
    assert_eq!(fabric.enabled_links(), vec![0, 1]);
    assert_eq!(bus.remote_addr(0), Some(0x42));
    assert_eq!(bus.remote_addr(1), Some(0x44));
    assert_eq!(supply.enable_count(), 3);
    assert_eq!(supply.disable_count(), 2);
}

#[test]
fn test_shared_rail_stays_up_until_last_link() {
    let bus = Arc::new(SimConfig::quad_deserializer(2).build());
    let rail = Arc::new(SimRegulator::new("vcam"));
    let links = [camera_link(0x42, true), camera_link(0x44, true)]
        .into_iter()
        .map(|link| LinkConfig { power_rail: Some("vcam".into()), ..link })
        .collect();

    let fabric = Fabric::builder(deserializer_config(links), bus)
        .link_regulator("vcam", rail.clone())
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();
    assert_eq!(fabric.enabled_links(), vec![0, 1]);
    assert_eq!(rail.enable_count(), 1);

    fabric.disable_serial_link(0).unwrap();
    assert_eq!(rail.disable_count(), 0);
    fabric.disable_serial_link(1).unwrap();
    assert_eq!(rail.disable_count(), 1);

    fabric.enable_serial_link(1).unwrap();
    assert_eq!(rail.enable_count(), 2);
}

#[test]
fn test_double_disable_releases_supply_once() {
    let bus = Arc::new(SimConfig::quad_deserializer(0).build());
    let mut supply = MockSupply::new();
    supply.expect_enable().times(1).returning(|| Ok(()));
    supply.expect_disable().times(1).returning(|| Ok(()));

    let fabric = Fabric::builder(deserializer_config(Vec::new()), bus)
        .regulator(Arc::new(supply))
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();

    fabric.disable().unwrap();
    fabric.disable().unwrap();
    assert!(!fabric.is_powered());
}

#[test]
fn test_unknown_chip_releases_supply() {
    let bus = Arc::new(SimBus::new());
    bus.add_device(0x27, SimDevice::new(0x55));
    let supply = Arc::new(SimRegulator::new("vdd"));

    let err = Fabric::builder(deserializer_config(Vec::new()), bus)
        .regulator(supply.clone())
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap_err();

    assert!(matches!(err, SerdesError::UnknownDevice { device_id: 0x55, .. }));
    assert_eq!(supply.enable_count(), 1);
    assert_eq!(supply.disable_count(), 1);
}

#[test]
fn test_chained_serializer_behind_link() {
    let bus = Arc::new(SimConfig::quad_deserializer(2).build());
    let clock = Arc::new(RecordingClock::new());
    let des = Fabric::builder(deserializer_config(Vec::new()), bus.clone())
        .clock(clock.clone())
        .attach()
        .unwrap();

    let ser_config = FabricConfig {
        name: "ser0".into(),
        addr: 0x42,
        phys_addr: Some(0x40),
        ..Default::default()
    };
    let ser = Fabric::builder(ser_config, bus.clone())
        .clock(clock)
        .upstream(des.clone(), 0)
        .attach()
        .unwrap();

    assert_eq!(ser.identity().device_id, max9295::DEVICE_ID);
    assert!(!ser.descriptor().is_deserializer());
    assert_eq!(bus.remote_addr(0), Some(0x42));
    assert_eq!(bus.remote_addr(1), Some(0x40));
    assert_eq!(des.isolated_link(), None);
    assert!(bus.collisions().is_empty());
}

#[test]
fn test_link_channel_reaches_remote() {
    let bus = Arc::new(SimConfig::quad_deserializer(1).build());
    let fabric = Fabric::builder(deserializer_config(vec![camera_link(0x42, true)]), bus)
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();

    let channel = fabric.channel(0).unwrap();
    let id = ChipIo::new(&channel, 0x42).read_u8(regs::DEV_ID).unwrap();
    assert_eq!(id, max9295::DEVICE_ID);

    let mut buf = [0u8; 1];
    channel.read(0x42, regs::DEV_ID, &mut buf).unwrap();
    assert_eq!(buf[0], max9295::DEVICE_ID);
    assert_eq!(fabric.selected_link(), None);
    assert!(fabric.channel(7).is_err());
}

#[test]
fn test_gmsl1_link_not_supported() {
    let bus = Arc::new(SimConfig::quad_deserializer(0).build());
    let link = LinkConfig {
        link_type: mx_core::LinkType::Gmsl1,
        auto_enable: false,
        ..Default::default()
    };
    let fabric = Fabric::builder(deserializer_config(vec![link]), bus)
        .clock(Arc::new(RecordingClock::new()))
        .attach()
        .unwrap();

    let err = fabric.enable_serial_link(0).unwrap_err();
    assert!(matches!(err, SerdesError::NotSupported(_)));
    fabric.disable_serial_link(0).unwrap();
    assert_eq!(fabric.link_state(0).unwrap(), LinkState::Disabled);
}

#[test]
fn test_timing_overrides_from_json() {
    let config = FabricConfig::from_json(
        r#"{ "name": "des0", "addr": 39, "timing": { "backoff_initial_ms": 10, "backoff_max_ms": 20 } }"#,
    )
    .unwrap();
    assert_eq!(config.timing.backoff_initial(), Duration::from_millis(10));
    assert_eq!(config.timing.probe_attempts, TimingConfig::default().probe_attempts);
}

#[test]
#[serial]
fn test_cycle_board_from_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("board.json");
    std::fs::write(&path, serde_json::to_string(&example_board()).unwrap()).unwrap();
    std::env::set_var("MAX9X_CONFIG", &path);
    std::env::set_var("MAX9X_EVENT_LOG", dir.path().join("events.json"));

    let board = load_board(&board_path(None)).unwrap();
    let report = cmd_cycle(&board).unwrap();
    assert!(report.survived);
    assert_eq!(report.links_after, vec![0, 1]);

    std::env::remove_var("MAX9X_CONFIG");
    std::env::remove_var("MAX9X_EVENT_LOG");
}
