use crate::alloc::{
    AllocInfo, Allocator, ConstraintAllocator, CurveKind, CurveOrder, LinearProgram, LpOutcome,
    MbsAllocator, MbsVariant, Relation,
};
use crate::config::{AllocatorFiles, build_allocator};
use crate::job::Job;
use crate::machine::{
    Dragonfly, DragonflyOpts, FreeNodes, HeatMatrix, Machine, NodeId, Topology,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;

/// 近处节点回流系数大，远处小
fn heat_for(m: &Machine) -> HeatMatrix {
    let n = m.num_nodes();
    let text: String = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let d = m.distance(NodeId(i), NodeId(j));
                    format!("{:.4}", 0.01 / (1.0 + d as f64))
                })
                .collect::<Vec<_>>()
                .join(" ")
                + "\n"
        })
        .collect();
    HeatMatrix::parse(&text, n).expect("heat matrix")
}

fn dragonfly() -> Machine {
    Machine::new(
        Topology::Dragonfly(Dragonfly::new(DragonflyOpts::default()).expect("dragonfly")),
        2,
    )
}

fn check_alloc(m: &Machine, free: &FreeNodes, job: &Job, info: &AllocInfo, who: &str) {
    let need = m.nodes_for(job.procs);
    assert_eq!(info.nodes.len(), need, "{who}: wrong node count for {}", job.id);
    let distinct: BTreeSet<NodeId> = info.nodes.iter().copied().collect();
    assert_eq!(distinct.len(), need, "{who}: duplicate nodes {:?}", info.nodes);
    for n in &info.nodes {
        assert!(free.is_free(*n), "{who}: node {} is not free", n.0);
    }
}

/// 随机的分配/释放序列；`None` 只允许出现在空闲节点确实不够的时候
fn exercise(m: &Machine, alloc: &mut dyn Allocator, seed: u64, max_procs: usize) {
    let who = alloc.name();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut free = m.all_free();
    let mut running: Vec<AllocInfo> = Vec::new();
    let mut next_id = 0;
    let mut placed = 0;

    for _ in 0..60 {
        if running.is_empty() || rng.gen_bool(0.6) {
            let procs = rng.gen_range(1..=max_procs);
            let job = Arc::new(Job::new(next_id, 0, procs, 10, 10));
            next_id += 1;
            match alloc.allocate(m, &free, &job).expect("allocate must not fail") {
                Some(info) => {
                    check_alloc(m, &free, &job, &info, who);
                    free.occupy(&info.nodes).expect("occupy");
                    running.push(info);
                    placed += 1;
                }
                None => assert!(
                    m.nodes_for(procs) > free.num_free(),
                    "{who}: refused {procs} procs with {} nodes free",
                    free.num_free()
                ),
            }
        } else {
            let info = running.swap_remove(rng.gen_range(0..running.len()));
            free.release(&info.nodes).expect("release");
            alloc.deallocate(&info).expect("deallocate");
        }
    }
    for info in running.drain(..) {
        free.release(&info.nodes).expect("release");
        alloc.deallocate(&info).expect("deallocate");
    }
    assert_eq!(free.num_free(), m.num_nodes());
    assert!(placed > 0, "{who} never placed a job");
}

#[test]
fn grid_allocators_honour_the_allocation_contract() {
    let m = Machine::mesh(4, 4, 2, 2);
    let m = m.clone().with_heat(heat_for(&m));
    let specs = [
        "simple",
        "random[7]",
        "nearest",
        "nearest[all,linf,linf,walls]",
        "nearest[intersect,l1,l1]",
        "nearest[free,linf,linf,curve]",
        "nearest[energy,l1,pairwise]",
        "genalg",
        "mm",
        "mc1x1",
        "hybrid",
        "energy",
        "mbs",
        "granularmbs",
        "octetmbs",
        "roundupmbs",
        "firstfit",
        "bestfit[sort,hilbert]",
        "sortedfreelist[nosort,hilbert]",
        "nearestamap",
        "spectralamap",
    ];
    for (i, spec) in specs.iter().enumerate() {
        let mut alloc =
            build_allocator(spec, &m, &AllocatorFiles::default()).expect("build allocator");
        exercise(&m, alloc.as_mut(), 100 + i as u64, 8);
    }
}

#[test]
fn torus_allocators_honour_the_allocation_contract() {
    let m = Machine::torus(4, 4, 4, 1);
    for (i, spec) in ["mbs", "octetmbs", "roundupmbs", "firstfit[sort,hilbert]", "mc1x1"]
        .iter()
        .enumerate()
    {
        let mut alloc =
            build_allocator(spec, &m, &AllocatorFiles::default()).expect("build allocator");
        exercise(&m, alloc.as_mut(), 200 + i as u64, 20);
    }
}

#[test]
fn dragonfly_allocators_honour_the_allocation_contract() {
    let m = dragonfly();
    for (i, spec) in [
        "simple",
        "random",
        "dflyrrn",
        "dflyslurm",
        "simplespread",
        "genalg",
        "nearestamap",
        "spectralamap",
    ]
    .iter()
    .enumerate()
    {
        let mut alloc =
            build_allocator(spec, &m, &AllocatorFiles::default()).expect("build allocator");
        exercise(&m, alloc.as_mut(), 300 + i as u64, 8);
    }
}

#[test]
fn allocators_refuse_oversized_requests_without_error() {
    let m = Machine::mesh(4, 4, 1, 1);
    let mut free = m.all_free();
    free.occupy(&(0..10).map(NodeId).collect::<Vec<_>>())
        .expect("occupy");
    let job = Arc::new(Job::new(0, 0, 7, 10, 10));
    for spec in ["simple", "random", "genalg", "firstfit", "bestfit", "nearestamap"] {
        let mut alloc =
            build_allocator(spec, &m, &AllocatorFiles::default()).expect("build allocator");
        assert!(
            alloc.allocate(&m, &free, &job).expect("allocate").is_none(),
            "{spec} must return None when 7 nodes are needed and 6 are free"
        );
    }
}

#[test]
fn topology_specific_allocators_reject_other_machines() {
    let mesh = Machine::mesh(4, 4, 1, 1);
    let files = AllocatorFiles::default();
    for spec in ["dflyrrn", "dflyslurm", "simplespread", "energy", "hybrid"] {
        assert!(build_allocator(spec, &mesh, &files).is_err(), "{spec} on a plain mesh");
    }
    let df = dragonfly();
    for spec in ["mbs", "firstfit", "nearest[free,linf,linf,curve]"] {
        assert!(build_allocator(spec, &df, &files).is_err(), "{spec} on a dragonfly");
    }
}

#[test]
fn curve_orders_are_bijections() {
    for m in [
        Machine::mesh(4, 4, 4, 1),
        Machine::mesh(3, 5, 2, 1),
        Machine::torus(6, 1, 3, 1),
        Machine::mesh(7, 1, 1, 1),
    ] {
        let g = m.grid().expect("grid");
        for kind in [CurveKind::Hilbert, CurveKind::Snake] {
            for sort in [false, true] {
                let c = CurveOrder::build(g, kind, sort);
                assert_eq!(c.len(), m.num_nodes());
                let mut ranks: Vec<usize> = (0..m.num_nodes()).map(|i| c.rank(NodeId(i))).collect();
                ranks.sort_unstable();
                assert_eq!(ranks, (0..m.num_nodes()).collect::<Vec<_>>(), "{kind:?} sort={sort}");
                for r in 0..c.len() {
                    assert_eq!(c.rank(c.node_at_rank(r)), r);
                }
            }
        }
    }
}

#[test]
fn snake_neighbours_in_rank_are_physical_neighbours() {
    let m = Machine::mesh(3, 4, 2, 1);
    let c = CurveOrder::build(m.grid().expect("grid"), CurveKind::Snake, false);
    for r in 1..c.len() {
        assert_eq!(m.distance(c.node_at_rank(r - 1), c.node_at_rank(r)), 1);
    }
}

#[test]
fn hilbert_neighbours_in_rank_are_physical_neighbours_on_cubes() {
    let m = Machine::mesh(4, 4, 4, 1);
    let c = CurveOrder::build(m.grid().expect("grid"), CurveKind::Hilbert, false);
    for r in 1..c.len() {
        assert_eq!(m.distance(c.node_at_rank(r - 1), c.node_at_rank(r)), 1, "rank {r}");
    }
}

#[test]
fn mbs_release_restores_the_free_block_registry() {
    let cases = [
        (Machine::mesh(4, 4, 2, 1), MbsVariant::Layered),
        (Machine::mesh(6, 4, 1, 1), MbsVariant::Layered),
        (Machine::mesh(4, 4, 2, 1), MbsVariant::Granular),
        (Machine::torus(4, 4, 4, 1), MbsVariant::Octet),
        (Machine::mesh(4, 4, 2, 1), MbsVariant::RoundUp),
    ];
    for (m, variant) in cases {
        let mut mbs = MbsAllocator::new(&m, variant).expect("mbs");
        let initial = mbs.snapshot();
        assert_eq!(mbs.free_capacity(), m.num_nodes());

        let sizes = [5, 1, 3, 4, 2, 7];
        let run = |mbs: &mut MbsAllocator| -> Vec<AllocInfo> {
            let mut free = m.all_free();
            let mut out = Vec::new();
            for (i, &procs) in sizes.iter().enumerate() {
                let job = Arc::new(Job::new(i as u64, 0, procs, 1, 1));
                if let Some(info) = mbs.allocate(&m, &free, &job).expect("allocate") {
                    free.occupy(&info.nodes).expect("mbs hands out free nodes");
                    out.push(info);
                }
            }
            out
        };

        let first = run(&mut mbs);
        assert!(!first.is_empty());
        for info in first.iter().rev() {
            mbs.deallocate(info).expect("deallocate");
        }
        assert_eq!(mbs.snapshot(), initial, "{variant:?}: registry not restored");
        mbs.verify().expect("registry consistent");

        let second = run(&mut mbs);
        let nodes = |v: &[AllocInfo]| v.iter().map(|a| a.nodes.clone()).collect::<Vec<_>>();
        assert_eq!(nodes(&first), nodes(&second), "{variant:?}: replay differs");
    }
}

#[test]
fn granular_mbs_reuses_block_slots_across_split_and_merge() {
    let m = Machine::mesh(4, 4, 1, 1);
    let mut mbs = MbsAllocator::new(&m, MbsVariant::Granular).expect("granular mbs");
    // 16 个单节点块 + 4 个 2x2 + 1 个 4x4
    assert_eq!(mbs.block_slots(), 21);

    let free = m.all_free();
    for i in 0..10 {
        let job = Arc::new(Job::new(i, 0, 1, 1, 1));
        let info = mbs
            .allocate(&m, &free, &job)
            .expect("allocate")
            .expect("a single node always fits");
        assert_eq!(info.nodes.len(), 1);
        assert_eq!(mbs.block_slots(), 21, "round {i}: split grew the block table");
        mbs.deallocate(&info).expect("deallocate");
        assert_eq!(mbs.block_slots(), 21, "round {i}: merge grew the block table");
        mbs.verify().expect("registry consistent");
    }
    assert_eq!(mbs.free_capacity(), 16);
}

#[test]
fn mbs_rejects_unknown_grants() {
    let m = Machine::mesh(4, 4, 1, 1);
    let mut mbs = MbsAllocator::new(&m, MbsVariant::Layered).expect("mbs");
    let stray = AllocInfo::new(Arc::new(Job::new(9, 0, 1, 1, 1)), vec![NodeId(0)]);
    assert!(matches!(
        mbs.deallocate(&stray),
        Err(crate::Error::BlockRegistry { .. })
    ));
}

#[test]
fn constraint_allocator_prefers_nodes_behind_a_removed_risk() {
    // r1 -> {0,1}, r2 -> {2,3}；4、5 不受约束
    let deps = "r1 0 1\nr2 2 3\n0 r1\n1 r1\n2 r2\n3 r2\n4 x\n5 y\n";
    let mut alloc = ConstraintAllocator::parse(deps, "r1 r2\n");
    assert_eq!(alloc.num_constraints(), 1);
    let m = Machine::simple(6, 1);
    let free = m.all_free();
    let job = Arc::new(Job::new(0, 0, 2, 1, 1));
    let info = alloc.allocate(&m, &free, &job).expect("allocate").expect("fits");
    check_alloc(&m, &free, &job, &info, "constraint");
    assert!(info.nodes.iter().any(|n| n.0 < 4), "got {:?}", info.nodes);

    // 没有约束时从下标最大的节点往下取
    let mut plain = ConstraintAllocator::parse("", "");
    let info = plain.allocate(&m, &free, &job).expect("allocate").expect("fits");
    assert_eq!(info.nodes, vec![NodeId(5), NodeId(4)]);
}

#[test]
fn constraint_allocator_requires_its_files() {
    let m = Machine::simple(4, 1);
    assert!(matches!(
        build_allocator("constraint", &m, &AllocatorFiles::default()),
        Err(crate::Error::Config(_))
    ));
}

#[test]
fn simplex_solves_small_programs() {
    // min x0 + 2 x1, x0 + x1 >= 3, x0 <= 2
    let mut lp = LinearProgram::new(2);
    lp.minimize(0, 1.0)
        .minimize(1, 2.0)
        .constrain(&[(0, 1.0), (1, 1.0)], Relation::Ge, 3.0)
        .upper_bound(0, 2.0);
    match lp.solve() {
        LpOutcome::Optimal { x, objective } => {
            assert!((objective - 4.0).abs() < 1e-6, "objective {objective}");
            assert!((x[0] - 2.0).abs() < 1e-6 && (x[1] - 1.0).abs() < 1e-6, "x = {x:?}");
        }
        other => panic!("expected optimum, got {other:?}"),
    }

    let mut bad = LinearProgram::new(1);
    bad.minimize(0, 1.0)
        .constrain(&[(0, 1.0)], Relation::Ge, 3.0)
        .constrain(&[(0, 1.0)], Relation::Le, 1.0);
    assert_eq!(bad.solve(), LpOutcome::Infeasible);

    let mut open = LinearProgram::new(1);
    open.minimize(0, -1.0).constrain(&[(0, 1.0)], Relation::Ge, 1.0);
    assert_eq!(open.solve(), LpOutcome::Unbounded);
}
