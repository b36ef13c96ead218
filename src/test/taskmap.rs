use super::job;
use crate::alloc::{AllocInfo, Allocator, SimpleAllocator};
use crate::config::build_task_mapper;
use crate::job::{Job, TaskCommInfo};
use crate::machine::{DragonflyOpts, Dragonfly, Machine, NodeId, Topology};
use crate::taskmap::{
    RcbTaskMapper, SimpleTaskMapper, TaskMapInfo, TaskMapper, partition, rcm_order, rebalance,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const MAPPERS: [&str; 9] = [
    "simple",
    "random[3]",
    "rcb",
    "rcm",
    "topo",
    "topo[rcm]",
    "nearestamap",
    "spectralamap",
    "default",
];

fn comm_variants(procs: usize) -> Vec<TaskCommInfo> {
    let mut v = vec![TaskCommInfo::all_to_all(procs)];
    if procs % 2 == 0 {
        v.push(TaskCommInfo::mesh(procs / 2, 2, 1));
    }
    // 环形加一条对角
    let mut m = vec![vec![0.0; procs]; procs];
    for i in 0..procs {
        m[i][(i + 1) % procs] = 2.0;
    }
    m[0][procs / 2] = 5.0;
    v.push(TaskCommInfo::from_matrix(&m));
    v
}

fn alloc_on(mach: &Machine, free_from: usize, job: Job) -> AllocInfo {
    let mut free = mach.all_free();
    let busy: Vec<NodeId> = (0..free_from).map(NodeId).collect();
    free.occupy(&busy).expect("occupy");
    SimpleAllocator
        .allocate(mach, &free, &Arc::new(job))
        .expect("allocate")
        .expect("enough free nodes")
}

fn check_mapping(mach: &Machine, info: &TaskMapInfo) {
    let alloc = &info.alloc;
    assert_eq!(info.task_to_node().len(), alloc.job.num_tasks());
    let mut load: BTreeMap<NodeId, usize> = BTreeMap::new();
    for &n in info.task_to_node() {
        assert!(alloc.nodes.contains(&n), "task on unallocated {n:?}");
        *load.entry(n).or_default() += 1;
    }
    assert!(load.values().all(|&k| k <= mach.cores_per_node));
    let m = info.metrics(mach);
    assert!(m.avg_hop_dist >= 0.0 && m.hop_bytes >= 0.0);
    assert!(m.max_congestion <= m.link_traffic.values().sum::<f64>() + 1e-9);
}

#[test]
fn every_mapper_respects_allocation_and_capacity() {
    let dfly = Machine::new(
        Topology::Dragonfly(Dragonfly::new(DragonflyOpts::default()).expect("dragonfly")),
        2,
    );
    let machines = [
        Machine::simple(12, 2),
        Machine::mesh(4, 3, 2, 2),
        Machine::torus(3, 3, 3, 1),
        dfly,
    ];
    for mach in &machines {
        for procs in [1, 3, 6, 8] {
            for comm in comm_variants(procs) {
                let j = Job::new(0, 0, procs, 10, 10).with_comm(comm);
                let alloc = alloc_on(mach, 2, j);
                for spec in MAPPERS {
                    let mut mapper = build_task_mapper(spec, "simple").expect(spec);
                    let info = mapper
                        .map_tasks(mach, &alloc)
                        .unwrap_or_else(|e| panic!("{spec} on {}: {e}", mach.setup_info()));
                    check_mapping(mach, &info);
                }
            }
        }
    }
}

#[test]
fn alloc_mappers_reuse_the_placement_chosen_at_allocation() {
    let mach = Machine::mesh(4, 4, 1, 2);
    let alloc = alloc_on(&mach, 0, Job::new(0, 0, 4, 10, 10));
    let placement = vec![alloc.nodes[1], alloc.nodes[1], alloc.nodes[0], alloc.nodes[0]];
    let alloc = alloc.with_placement(placement.clone());
    for spec in ["nearestamap", "spectralamap"] {
        let mut mapper = build_task_mapper(spec, "simple").expect(spec);
        let info = mapper.map_tasks(&mach, &alloc).expect("map");
        assert_eq!(info.task_to_node(), placement.as_slice(), "{spec}");
    }
}

#[test]
fn default_mapper_follows_the_allocator() {
    for (alloc, expected) in [
        ("nearestamap", "nearestamap"),
        ("spectralamap", "spectralamap"),
        ("mbs", "simple"),
        ("", "simple"),
    ] {
        let mapper = build_task_mapper("", alloc).expect("default mapper");
        assert_eq!(mapper.name(), expected, "allocator {alloc:?}");
    }
    assert_eq!(
        build_task_mapper("rcb", "nearestamap").expect("explicit").name(),
        "rcb"
    );
}

#[test]
fn simple_mapper_fills_nodes_in_order() {
    let mach = Machine::simple(4, 3);
    let alloc = alloc_on(&mach, 0, Job::new(0, 0, 7, 1, 1));
    let info = SimpleTaskMapper.map_tasks(&mach, &alloc).expect("map");
    let n = &alloc.nodes;
    assert_eq!(
        info.task_to_node(),
        &[n[0], n[0], n[0], n[1], n[1], n[1], n[2]]
    );
}

#[test]
fn rcb_maps_a_mesh_job_onto_a_matching_mesh_with_unit_hops() {
    let mach = Machine::mesh(4, 2, 1, 1);
    let j = Job::new(0, 0, 8, 10, 10).with_comm(TaskCommInfo::mesh(4, 2, 1));
    let alloc = alloc_on(&mach, 0, j);
    let info = RcbTaskMapper.map_tasks(&mach, &alloc).expect("map");
    let m = info.metrics(&mach);
    assert_eq!(m.avg_hop_dist, 1.0);
    // 4x2 网格有 10 条边，权重都为 1
    assert_eq!(m.hop_bytes, 10.0);
}

#[test]
fn rcb_cuts_tasks_and_nodes_along_one_shared_axis() {
    // 任务排成 8x1 的一行（x 方向宽），节点是 2x4 的网格（y 方向宽）
    let mach = Machine::mesh(2, 4, 1, 1);
    let j = Job::new(0, 0, 8, 10, 10).with_comm(TaskCommInfo::mesh(8, 1, 1));
    let alloc = alloc_on(&mach, 0, j);
    let info = RcbTaskMapper.map_tasks(&mach, &alloc).expect("map");
    check_mapping(&mach, &info);

    // 任务的归一化跨度更大，第一刀沿 x 切：前四个任务占 x=0 一列，后四个占 x=1 一列，
    // 每一列内再沿 y 依次排开
    let expected: Vec<NodeId> = (0..8).map(|i| NodeId(i / 4 + 2 * (i % 4))).collect();
    assert_eq!(info.task_to_node(), &expected[..]);

    let map = info.task_to_node();
    let hops: Vec<usize> = (0..7).map(|i| mach.distance(map[i], map[i + 1])).collect();
    assert_eq!(hops, vec![1, 1, 1, 4, 1, 1, 1]);
    assert_eq!(info.hop_bytes(&mach), 10.0);
}

#[test]
fn metrics_count_hops_and_link_traffic() {
    let mach = Machine::mesh(4, 1, 1, 1);
    let alloc = AllocInfo::new(job(0, 0, 2, 1, 1), vec![NodeId(0), NodeId(3)]);
    let info = TaskMapInfo::new(&mach, alloc, vec![NodeId(0), NodeId(3)]).expect("valid");
    assert_eq!(info.avg_hop_dist(&mach), 3.0);
    assert_eq!(info.hop_bytes(&mach), 3.0);
    assert_eq!(info.metrics(&mach).link_traffic.len(), 3);
    assert_eq!(info.max_congestion(&mach), 1.0);

    // 同一节点上的任务不产生跳数
    let mach = Machine::mesh(4, 1, 1, 2);
    let alloc = AllocInfo::new(job(1, 0, 2, 1, 1), vec![NodeId(2)]);
    let info = TaskMapInfo::new(&mach, alloc, vec![NodeId(2), NodeId(2)]).expect("valid");
    assert_eq!(info.hop_bytes(&mach), 0.0);
    assert_eq!(info.max_congestion(&mach), 0.0);
}

#[test]
fn task_map_info_rejects_invalid_mappings() {
    let mach = Machine::simple(4, 1);
    let alloc = AllocInfo::new(job(0, 0, 2, 1, 1), vec![NodeId(0), NodeId(1)]);
    assert!(TaskMapInfo::new(&mach, alloc.clone(), vec![NodeId(0)]).is_err());
    assert!(TaskMapInfo::new(&mach, alloc.clone(), vec![NodeId(0), NodeId(2)]).is_err());
    assert!(TaskMapInfo::new(&mach, alloc, vec![NodeId(1), NodeId(1)]).is_err());
}

fn is_permutation(order: &[usize], n: usize) -> bool {
    let mut seen = vec![false; n];
    order.len() == n && order.iter().all(|&v| v < n && !std::mem::replace(&mut seen[v], true))
}

#[test]
fn rcm_orders_a_path_with_bandwidth_one() {
    // 打乱编号的路径 3-0-4-1-2
    let path = [3, 0, 4, 1, 2];
    let mut adj = vec![Vec::new(); 5];
    for w in path.windows(2) {
        adj[w[0]].push(w[1]);
        adj[w[1]].push(w[0]);
    }
    let order = rcm_order(&adj);
    assert!(is_permutation(&order, 5));
    for w in order.windows(2) {
        assert!(adj[w[0]].contains(&w[1]), "{order:?} is not a path walk");
    }
}

#[test]
fn rcm_covers_disconnected_graphs() {
    let adj = vec![vec![1], vec![0], vec![], vec![4], vec![3], vec![]];
    assert!(is_permutation(&rcm_order(&adj), 6));
}

#[test]
fn partition_keeps_cliques_together() {
    let mut adj = vec![Vec::new(); 6];
    let mut edge = |a: usize, b: usize, w: f64| {
        adj[a].push((b, w));
        adj[b].push((a, w));
    };
    for (a, b) in [(0, 1), (0, 2), (1, 2), (3, 4), (3, 5), (4, 5)] {
        edge(a, b, 1.0);
    }
    edge(2, 3, 0.1);

    let part = partition(&adj, &[3, 3]);
    assert_eq!(part[0], part[1]);
    assert_eq!(part[1], part[2]);
    assert_eq!(part[3], part[4]);
    assert_eq!(part[4], part[5]);
    assert_ne!(part[0], part[3]);
}

#[test]
fn partition_and_rebalance_hit_the_target_sizes() {
    let adj = TaskCommInfo::mesh(3, 3, 1).adjacency();
    let sizes = [4, 3, 2];
    let part = partition(&adj, &sizes);
    for (p, &want) in sizes.iter().enumerate() {
        assert_eq!(part.iter().filter(|&&q| q == p).count(), want);
    }

    let mut lopsided = vec![0; 9];
    rebalance(&adj, &mut lopsided, &sizes);
    for (p, &want) in sizes.iter().enumerate() {
        assert_eq!(lopsided.iter().filter(|&&q| q == p).count(), want);
    }
}
