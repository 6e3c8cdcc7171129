use kernel_hpa::config::MAX_REGIONS;
use kernel_hpa::{AddrRange, ControllerWindow, HpaError, PhysAddr, RegionRegistry};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

fn range(start_mib: u64, end_mib: u64) -> AddrRange {
    AddrRange::from_bounds(PhysAddr::new(start_mib * MIB), PhysAddr::new(end_mib * MIB))
}

fn spans(reg: &RegionRegistry) -> Vec<(u64, u64, Option<u32>)> {
    reg.regions()
        .iter()
        .map(|r| (r.base.as_u64() / MIB, r.end().as_u64() / MIB, r.controller))
        .collect()
}

/// Two controllers, the second one with a firmware carve-out.
fn board() -> (Vec<ControllerWindow>, Vec<AddrRange>) {
    let windows = vec![
        ControllerWindow::new(0, range(0, 1024)),
        ControllerWindow::new(1, range(1024, 3072)),
    ];
    let usable = vec![range(0, 960), range(1024, 2000), range(2048, 3072)];
    (windows, usable)
}

#[test]
fn boot_configuration_end_to_end() {
    let mut reg = RegionRegistry::new();
    reg.add_region(PhysAddr::new(512 * MIB), GIB).unwrap();
    reg.add_region(PhysAddr::new(2500 * MIB), 100 * MIB).unwrap();

    let (windows, usable) = board();
    reg.configure(&windows, &usable);

    assert_eq!(
        spans(&reg),
        [
            (512, 960, Some(0)),
            (1024, 1536, Some(1)),
            (2500, 2600, Some(1)),
        ]
    );
    assert_eq!(reg.find_region(PhysAddr::new(1030 * MIB), 4 * MIB), Some(1));
    assert_eq!(reg.find_region(PhysAddr::new(1000 * MIB), 4 * MIB), None);
}

#[test]
fn region_straddling_a_carve_out_is_split() {
    let mut reg = RegionRegistry::new();
    reg.add_region(PhysAddr::new(1900 * MIB), 300 * MIB).unwrap();

    let (windows, usable) = board();
    reg.configure(&windows, &usable);

    assert_eq!(spans(&reg), [(1900, 2000, Some(1)), (2048, 2200, Some(1))]);
}

#[test]
fn region_outside_every_window_is_dropped() {
    let mut reg = RegionRegistry::new();
    reg.add_region(PhysAddr::new(4 * GIB), 64 * MIB).unwrap();
    reg.add_region(PhysAddr::new(100 * MIB), 64 * MIB).unwrap();

    let (windows, usable) = board();
    reg.configure(&windows, &usable);
    assert_eq!(spans(&reg), [(100, 164, Some(0))]);
}

#[test]
fn default_region_covers_movable_memory() {
    let mut reg = RegionRegistry::new();
    reg.set_movable_start(PhysAddr::new(768 * MIB).pfn());
    reg.use_default_region(PhysAddr::new(3072 * MIB));

    let (windows, usable) = board();
    reg.configure(&windows, &usable);
    assert_eq!(
        spans(&reg),
        [
            (768, 960, Some(0)),
            (1024, 2000, Some(1)),
            (2048, 3072, Some(1)),
        ]
    );
}

#[test]
fn registry_capacity() {
    let mut reg = RegionRegistry::new();
    for i in 0..MAX_REGIONS as u64 {
        reg.add_region(PhysAddr::new(i * 100 * MIB), 10 * MIB).unwrap();
    }
    assert_eq!(
        reg.add_region(PhysAddr::new(GIB), 10 * MIB),
        Err(HpaError::TooManyRegions)
    );
    assert_eq!(reg.len(), MAX_REGIONS);
    assert_eq!(reg.region_info(1), Some((PhysAddr::new(100 * MIB), 10 * MIB)));
}
