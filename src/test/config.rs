use crate::config::{
    AllocatorFiles, Params, build_allocator, build_machine, build_scheduler, build_task_mapper,
    parse_params,
};
use crate::error::Error;
use crate::machine::Machine;

fn params(name: &str, args: &[&str]) -> Params {
    Params {
        name: name.into(),
        args: args.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn parse_params_splits_name_and_arguments() {
    assert_eq!(parse_params("mbs").expect("bare"), params("mbs", &[]));
    assert_eq!(parse_params("easy[]").expect("empty"), params("easy", &[]));
    assert_eq!(
        parse_params("  FirstFit[ sort , Hilbert ] ").expect("args"),
        params("firstfit", &["sort", "hilbert"])
    );
    assert_eq!(
        parse_params("torus[4,4,4]").expect("dims"),
        params("torus", &["4", "4", "4"])
    );
}

#[test]
fn parse_params_rejects_malformed_specs() {
    for bad in ["", "[1,2]", "mesh[4,4", "mesh[4,[4]]", "mesh]4["] {
        assert!(
            matches!(parse_params(bad), Err(Error::Config(_))),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn machines_build_from_specs() {
    let m = build_machine("torus[4,4,4]", 2).expect("torus");
    assert_eq!(m.num_nodes(), 64);
    assert_eq!(m.num_cores(), 128);
    assert!(m.grid().is_some());

    let m = build_machine("mesh[5,3]", 1).expect("2d mesh");
    assert_eq!(m.num_nodes(), 15);

    assert_eq!(build_machine("simple[10]", 4).expect("simple").num_cores(), 40);

    let d = build_machine("dragonfly", 1).expect("default dragonfly");
    assert_eq!(d.num_nodes(), 40);
    let d = build_machine("dragonfly[4,7,1,2,all_to_all,circulant]", 1).expect("dragonfly");
    assert!(d.dragonfly().is_some());
}

#[test]
fn bad_machine_specs_are_config_errors() {
    for (spec, cpn) in [
        ("torus[4,4,4]", 0),
        ("simple[0]", 1),
        ("simple", 1),
        ("mesh[4]", 1),
        ("mesh[4,0,2]", 1),
        ("mesh[4,4,4,4]", 1),
        ("torus[a,4]", 1),
        ("hypercube[4]", 1),
        ("dragonfly[4,7,1,2,mesh]", 1),
        ("dragonfly[4,7,1,2,all_to_all,spiral]", 1),
    ] {
        assert!(
            matches!(build_machine(spec, cpn), Err(Error::Config(_))),
            "{spec} with {cpn} cores per node should be rejected"
        );
    }
}

#[test]
fn schedulers_build_with_comparators() {
    let m = Machine::simple(8, 1);
    for (spec, name) in [
        ("pqueue", "pqueue"),
        ("fifo", "pqueue"),
        ("pqueue[largefirst]", "pqueue"),
        ("easy[shortfirst]", "easy"),
        ("cons", "cons"),
        ("prioritize[2]", "prioritize"),
        ("prioritize[2,betterfit]", "prioritize"),
        ("delayed[longfirst]", "delayed"),
        ("elc[1,fifo]", "elc"),
    ] {
        let s = build_scheduler(spec, &m).unwrap_or_else(|e| panic!("{spec}: {e}"));
        assert_eq!(s.name(), name, "{spec}");
    }
    assert!(build_scheduler("easy[largefirst]", &m)
        .expect("easy")
        .setup_info()
        .contains("largefirst"));
}

#[test]
fn bad_scheduler_specs_are_config_errors() {
    let m = Machine::simple(8, 1);
    for spec in [
        "easy[lifo]",
        "easy[fifo,fifo]",
        "prioritize",
        "elc[x]",
        "fifo[1,2]",
        "backfill",
    ] {
        assert!(
            matches!(build_scheduler(spec, &m), Err(Error::Config(_))),
            "{spec}"
        );
    }
}

#[test]
fn allocators_check_machine_requirements() {
    let mesh = Machine::mesh(4, 4, 2, 1);
    let files = AllocatorFiles::default();
    for spec in [
        "simple",
        "random[9]",
        "nearest",
        "nearest[free,l1,linf,walls]",
        "genalg",
        "mm",
        "mc1x1",
        "mbs",
        "granularmbs",
        "octetmbs",
        "roundupmbs",
        "firstfit",
        "bestfit[sort,hilbert]",
        "sortedfreelist[sort,snake]",
        "nearestamap",
        "spectralamap",
    ] {
        let a = build_allocator(spec, &mesh, &files).unwrap_or_else(|e| panic!("{spec}: {e}"));
        assert!(!a.name().is_empty());
    }

    let simple = Machine::simple(8, 1);
    for spec in ["mbs", "firstfit", "dflyrrn", "energy", "hybrid", "constraint"] {
        assert!(
            matches!(build_allocator(spec, &simple, &files), Err(Error::Config(_))),
            "{spec} on a simple machine"
        );
    }
    for spec in ["simple[1]", "random[x]", "quantum"] {
        assert!(build_allocator(spec, &simple, &files).is_err(), "{spec}");
    }
}

#[test]
fn unknown_task_mappers_are_config_errors() {
    for spec in ["hilbert", "topo[spiral]", "rcb[1]", "random[-1]"] {
        assert!(
            matches!(build_task_mapper(spec, "simple"), Err(Error::Config(_))),
            "{spec}"
        );
    }
}

#[test]
fn random_components_default_to_the_same_seed_however_they_are_built() {
    use crate::alloc::{Allocator, DEFAULT_SEED, RandomAllocator};
    use crate::job::Job;
    use crate::taskmap::{RandomTaskMapper, TaskMapper};
    use std::sync::Arc;

    let m = Machine::mesh(4, 4, 1, 2);
    let files = AllocatorFiles::default();
    let free = m.all_free();
    let job = Arc::new(Job::new(0, 0, 9, 5, 5));

    let mut built = build_allocator("random", &m, &files).expect("random");
    let mut by_default = RandomAllocator::default();
    assert!(built.setup_info().contains(&format!("seed {DEFAULT_SEED}")));
    let a = built.allocate(&m, &free, &job).expect("allocate").expect("fits");
    let b = by_default.allocate(&m, &free, &job).expect("allocate").expect("fits");
    assert_eq!(a.nodes, b.nodes);

    let mut built = build_task_mapper("random", "simple").expect("random mapper");
    let mut by_default = RandomTaskMapper::default();
    assert_eq!(
        built.map_tasks(&m, &a).expect("map").task_to_node(),
        by_default.map_tasks(&m, &a).expect("map").task_to_node()
    );
}
