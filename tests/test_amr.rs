use common::{
    assert_valid, get_amr_config, get_cells, get_eos, get_mesh, random_points, unit_box, AMR_CONFIG, EOS_CONFIG,
};
use float_cmp::assert_approx_eq;
use glam::DVec2;
use mvmm_tess::{
    gas_law::GasLaw,
    physical_quantities::{ComputationalCell, Extensive},
    AmrConfig, BoundaryKind, ClusterContext, Communicator, ConservativeAmr, MeshConfig, ProcessorTessellation,
    ThreadCluster, VolumeThresholdRefine, VolumeThresholdRemove, VoronoiMesh,
};

mod common;

fn get_extensives(mesh: &VoronoiMesh, cells: &[ComputationalCell], eos: &GasLaw) -> Vec<Extensive> {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| Extensive::from_cell(cell, mesh.volume(i), eos))
        .collect()
}

/// Mass, energy, momentum and tracer totals.
fn totals(extensives: &[Extensive]) -> [f64; 5] {
    extensives.iter().fold([0.; 5], |sum, e| {
        [
            sum[0] + e.mass,
            sum[1] + e.energy,
            sum[2] + e.momentum.x,
            sum[3] + e.momentum.y,
            sum[4] + e.tracers[0],
        ]
    })
}

fn assert_conserved(before: [f64; 5], after: [f64; 5]) {
    for (b, a) in before.into_iter().zip(after) {
        assert_approx_eq!(f64, b, a, epsilon = 1e-7);
    }
}

fn amr(count: usize, config: AmrConfig) -> ConservativeAmr<VolumeThresholdRefine, VolumeThresholdRemove> {
    let mean = 1. / count as f64;
    ConservativeAmr::new(
        VolumeThresholdRefine {
            max_volume: 1.5 * mean,
            skip_sticker: None,
        },
        VolumeThresholdRemove {
            min_volume: 0.4 * mean,
            skip_sticker: None,
        },
        config,
    )
}

fn run_serial(kind: BoundaryKind, seed: u64) {
    let eos = get_eos(EOS_CONFIG);
    let points = random_points(200, seed);
    let mut mesh = get_mesh(&points, kind);
    let mut cells = get_cells(&points);
    let mut extensives = get_extensives(&mesh, &cells, &eos);
    let before = totals(&extensives);

    let amr = amr(200, get_amr_config(AMR_CONFIG));
    let mut changed = 0;
    for step in 0..3 {
        let (added, removed) = amr
            .update_cells(&mut mesh, &mut cells, &mut extensives, &eos, step as f64, None)
            .unwrap();
        changed += added + removed;
        assert_eq!(cells.len(), mesh.point_count());
        assert_eq!(extensives.len(), mesh.point_count());
        assert_valid(&mesh);
        assert_conserved(before, totals(&extensives));
    }
    assert!(changed > 0);
    assert!(cells.iter().all(|cell| cell.density > 0. && cell.pressure > 0.));
}

#[test]
fn test_amr_rigid() {
    run_serial(BoundaryKind::Rigid, 31);
}

#[test]
fn test_amr_periodic() {
    run_serial(BoundaryKind::Periodic, 32);
}

#[test]
fn test_amr_half_periodic() {
    run_serial(BoundaryKind::HalfPeriodic, 33);
}

#[test]
fn test_amr_tracers_follow_mass() {
    let eos = get_eos(EOS_CONFIG);
    let points = random_points(150, 34);
    let mut mesh = get_mesh(&points, BoundaryKind::Rigid);
    // A uniform tracer stays uniform under remapping.
    let mut cells: Vec<ComputationalCell> = points
        .iter()
        .map(|p| ComputationalCell::new(1. + p.x, 1., DVec2::ZERO).with_tracers(vec![0.3]))
        .collect();
    let mut extensives = get_extensives(&mesh, &cells, &eos);
    amr(150, get_amr_config(AMR_CONFIG))
        .update_cells(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
        .unwrap();
    for cell in &cells {
        assert_approx_eq!(f64, cell.tracers[0], 0.3, epsilon = 1e-10);
    }
}

#[test]
fn test_amr_two_ranks() {
    let eos = get_eos(EOS_CONFIG);
    let points = random_points(240, 35);
    let results = ThreadCluster::run(2, |comm| {
        let boundary = unit_box(BoundaryKind::Periodic);
        let procs = ProcessorTessellation::grid(2, 1, boundary.clone()).unwrap();
        let mine = if comm.rank() == 0 { &points[..] } else { &[][..] };
        let (mut mesh, _) =
            VoronoiMesh::new_distributed(mine, boundary, MeshConfig::default(), &procs, &comm).unwrap();
        let mut cells = get_cells(mesh.mesh_points());
        let mut extensives = get_extensives(&mesh, &cells, &eos);
        let before = totals(&extensives);

        let cluster = ClusterContext {
            procs: &procs,
            comm: &comm,
        };
        let (added, removed) = amr(240, get_amr_config(AMR_CONFIG))
            .update_cells(&mut mesh, &mut cells, &mut extensives, &eos, 0., Some(cluster))
            .unwrap();
        assert_eq!(cells.len(), mesh.point_count());
        let cell = procs.cell_polygon(comm.rank());
        assert!(mesh
            .mesh_points()
            .iter()
            .all(|p| procs.locate(*p, comm.rank()) == Some(comm.rank())), "{cell:?}");
        (before, totals(&extensives), added + removed, mesh.total_volume())
    });

    let mut before = [0.; 5];
    let mut after = [0.; 5];
    let mut volume = 0.;
    for (b, a, _, v) in &results {
        for i in 0..5 {
            before[i] += b[i];
            after[i] += a[i];
        }
        volume += v;
    }
    assert_conserved(before, after);
    assert_approx_eq!(f64, volume, 1., epsilon = 1e-9);
    assert!(results.iter().map(|(_, _, changed, _)| changed).sum::<usize>() > 0);
}
