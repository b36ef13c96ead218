use crate::cluster::{ClusterWorld, JobArrival};
use crate::config::{AllocatorFiles, build_allocator, build_scheduler, build_task_mapper};
use crate::job::Job;
use crate::machine::Machine;
use crate::sim::{Event, SimTime, Simulator, World};
use std::any::Any;
use std::sync::{Arc, Mutex};

fn fifo_cluster(nodes: usize) -> ClusterWorld {
    let m = Machine::simple(nodes, 1);
    ClusterWorld::new(
        m.clone(),
        build_scheduler("pqueue", &m).expect("pqueue"),
        build_allocator("simple", &m, &AllocatorFiles::default()).expect("simple"),
        build_task_mapper("", "simple").expect("mapper"),
    )
}

fn arrival(id: u64, at: u64, procs: usize, runtime: u64) -> JobArrival {
    JobArrival {
        job: Arc::new(Job::new(id, at, procs, runtime, runtime)),
    }
}

/// (作业, 开始, 结束)，按开始时刻排序
fn spans(w: &ClusterWorld) -> Vec<(u64, u64, u64)> {
    let mut v: Vec<_> = w
        .stats
        .jobs
        .iter()
        .map(|r| (r.job, r.start.0, r.end.0))
        .collect();
    v.sort_by_key(|&(job, start, _)| (start, job));
    v
}

#[test]
fn arrivals_dispatch_by_time_not_by_scheduling_order() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(10), arrival(0, 10, 1, 1));
    sim.schedule(SimTime(5), arrival(1, 5, 1, 1));
    sim.schedule(SimTime(10), arrival(2, 10, 1, 2));

    let mut w = fifo_cluster(1);
    sim.run(&mut w);
    w.finish().expect("finish");
    assert_eq!(spans(&w), vec![(1, 5, 6), (0, 10, 11), (2, 11, 13)]);
    assert_eq!(sim.now(), SimTime(13));
    assert_eq!(sim.pending(), 0);
}

#[test]
fn start_requested_by_an_arrival_runs_in_the_same_instant() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(4), arrival(0, 4, 1, 3));

    let mut w = fifo_cluster(2);
    sim.run(&mut w);
    assert_eq!(spans(&w), vec![(0, 4, 7)]);
    assert_eq!(w.finished(), 1);
}

#[test]
fn run_until_stops_between_a_start_and_its_completion() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(0), arrival(0, 0, 2, 10));
    let mut w = fifo_cluster(2);

    sim.run_until(SimTime(5), &mut w);
    assert_eq!(sim.now(), SimTime(5));
    assert_eq!(w.running(), 1);
    assert_eq!(w.finished(), 0);
    // 只剩下结束事件
    assert_eq!(sim.pending(), 1);

    sim.run(&mut w);
    assert_eq!(sim.now(), SimTime(10));
    assert_eq!(w.running(), 0);
    assert_eq!(w.finished(), 1);
}

#[test]
fn run_until_includes_a_completion_exactly_at_the_limit() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(0), arrival(0, 0, 1, 10));
    sim.schedule(SimTime(12), arrival(1, 12, 1, 1));
    let mut w = fifo_cluster(1);

    sim.run_until(SimTime(10), &mut w);
    assert_eq!(sim.now(), SimTime(10));
    assert_eq!(w.finished(), 1);
    assert_eq!(w.running(), 0);
    assert_eq!(sim.pending(), 1);
}

#[test]
fn run_until_advances_an_idle_cluster() {
    let mut sim = Simulator::default();
    let mut w = fifo_cluster(1);

    sim.run_until(SimTime(7), &mut w);
    assert_eq!(sim.now(), SimTime(7));
    assert_eq!(w.finished(), 0);
    assert!(w.error().is_none());
}

#[derive(Default)]
struct DummyWorld {
    ticks: usize,
}

impl World for DummyWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_tick(&mut self, _sim: &mut Simulator) {
        self.ticks = self.ticks.saturating_add(1);
    }
}

struct Push {
    id: u32,
    log: Arc<Mutex<Vec<u32>>>,
}

impl Event for Push {
    fn execute(self: Box<Self>, _sim: &mut Simulator, _world: &mut dyn World) {
        let Push { id, log } = *self;
        log.lock().expect("log lock").push(id);
    }
}

struct Classed {
    id: u32,
    class: u8,
    log: Arc<Mutex<Vec<u32>>>,
}

impl Event for Classed {
    fn execute(self: Box<Self>, _sim: &mut Simulator, _world: &mut dyn World) {
        self.log.lock().expect("log lock").push(self.id);
    }

    fn class(&self) -> u8 {
        self.class
    }
}

#[test]
fn same_time_events_run_by_class_then_seq() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sim = Simulator::default();
    // 启动尝试(2) 先入队，结束(0) 与到达(1) 后入队
    for (id, class) in [(1, 2), (2, 1), (3, 0), (4, 1), (5, 0)] {
        sim.schedule(
            SimTime(3),
            Classed {
                id,
                class,
                log: Arc::clone(&log),
            },
        );
    }
    sim.schedule(
        SimTime(2),
        Classed {
            id: 6,
            class: 2,
            log: Arc::clone(&log),
        },
    );

    let mut world = DummyWorld::default();
    sim.run(&mut world);
    assert_eq!(&*log.lock().expect("log lock"), &[6, 3, 5, 2, 4, 1]);
    assert_eq!(world.ticks, 6);
}

struct HaltAfter {
    left: usize,
}

impl World for HaltAfter {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_tick(&mut self, _sim: &mut Simulator) {
        self.left = self.left.saturating_sub(1);
    }

    fn halted(&self) -> bool {
        self.left == 0
    }
}

#[test]
fn halted_world_stops_dispatch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sim = Simulator::default();
    for id in 0..5 {
        sim.schedule(
            SimTime(u64::from(id)),
            Push {
                id,
                log: Arc::clone(&log),
            },
        );
    }
    let mut world = HaltAfter { left: 2 };
    sim.run(&mut world);
    assert_eq!(&*log.lock().expect("log lock"), &[0, 1]);
    assert_eq!(sim.pending(), 3);
    assert_eq!(sim.now(), SimTime(1));
}

#[test]
fn sim_time_arithmetic_saturates() {
    assert_eq!(SimTime(5).after(3), SimTime(8));
    assert_eq!(SimTime::MAX.after(1), SimTime::MAX);
    assert_eq!(SimTime(8).since(SimTime(5)), 3);
    assert_eq!(SimTime(5).since(SimTime(8)), 0);
}
