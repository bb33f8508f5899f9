use mesh_m2n::algs::marshal::{CellBlockMarshaler, MeshFragment};
use mesh_m2n::algs::schedule::{RedistributionScheduler, compute_targets, funnel_weights, plan_transfers};
use mesh_m2n::algs::transfer::{duplicate_all_gather, redistribute};
use mesh_m2n::algs::communicator::Communicator;
use mesh_m2n::m2n_error::M2nError;

mod util;
use util::*;

#[test]
fn ten_cells_on_one_rank_spread_over_four() {
    let initial = [10usize, 0, 0, 0];
    let out = run_world(4, |comm| {
        let me = comm.rank();
        let local = cells(me, initial[me]);
        let sched = RedistributionScheduler::balanced(4)
            .schedule(comm, local.num_cells())
            .unwrap();
        let got = redistribute(comm, &sched, &local, &CellBlockMarshaler).unwrap();
        (sched, got)
    });

    let finals: Vec<usize> = out.iter().map(|(_, b)| b.num_cells()).collect();
    assert_eq!(finals.iter().sum::<usize>(), 10);
    assert_eq!(finals[0], 3);
    let (lo, hi) = (finals.iter().min().unwrap(), finals.iter().max().unwrap());
    assert!(hi - lo <= 1, "finals {finals:?}");

    // Every transfer comes from rank 0; only rank 0 sends.
    for (rank, (sched, block)) in out.iter().enumerate() {
        assert!(sched.recvs.iter().all(|t| t.from == 0));
        assert_eq!(sched.sends.is_empty(), rank != 0);
        assert!(origins(block).iter().all(|&o| o == 0));
    }
    // Cells stay in order and none are lost or duplicated.
    let mut all: Vec<Vec<u8>> = out
        .iter()
        .flat_map(|(_, b)| b.cells().iter().map(|c| c.to_vec()))
        .collect();
    all.sort();
    assert_eq!(all, (0..10u8).map(|i| vec![0, i]).collect::<Vec<_>>());
}

#[test]
fn six_ranks_funnel_onto_two() {
    let out = run_world(6, |comm| {
        let local = cells(comm.rank(), 5);
        let sched = RedistributionScheduler::funnel(6, 2)
            .schedule(comm, local.num_cells())
            .unwrap();
        redistribute(comm, &sched, &local, &CellBlockMarshaler).unwrap()
    });
    let finals: Vec<usize> = out.iter().map(|b| b.num_cells()).collect();
    assert_eq!(finals, vec![15, 15, 0, 0, 0, 0]);
    // Receivers keep their own cells first, then donors in rank order.
    assert_eq!(origins(&out[0]), [[0u8; 5], [2; 5], [3; 5]].concat());
    assert_eq!(origins(&out[1]), [[1u8; 5], [4; 5], [5; 5]].concat());
}

#[test]
fn balanced_input_moves_nothing() {
    let out = run_world(3, |comm| {
        let local = cells(comm.rank(), 4);
        let sched = RedistributionScheduler::balanced(3)
            .schedule(comm, local.num_cells())
            .unwrap();
        let got = redistribute(comm, &sched, &local, &CellBlockMarshaler).unwrap();
        (sched.is_empty(), got == local)
    });
    assert!(out.iter().all(|&(empty, same)| empty && same));
}

#[test]
fn weighted_redistribution_follows_weights() {
    let initial = [0usize, 12, 0];
    let out = run_world(3, |comm| {
        let me = comm.rank();
        let local = cells(me, initial[me]);
        let sched = RedistributionScheduler::weighted(vec![1.0, 2.0, 3.0])
            .schedule(comm, local.num_cells())
            .unwrap();
        redistribute(comm, &sched, &local, &CellBlockMarshaler)
            .unwrap()
            .num_cells()
    });
    assert_eq!(out, vec![2, 4, 6]);
}

#[test]
fn weight_count_must_match_domain() {
    let out = run_world(2, |comm| {
        RedistributionScheduler::weighted(vec![1.0, 1.0, 1.0]).schedule(comm, 1)
    });
    assert!(out.iter().all(|r| matches!(r, Err(M2nError::CountMismatch(_)))));
}

#[test]
fn duplicate_gives_everyone_the_union() {
    let sizes = [2usize, 0, 3];
    let out = run_world(3, |comm| {
        let local = cells(comm.rank(), sizes[comm.rank()]);
        duplicate_all_gather(comm, &local, &CellBlockMarshaler).unwrap()
    });
    for block in &out {
        assert_eq!(origins(block), vec![0, 0, 2, 2, 2]);
    }
}

#[test]
fn pure_schedule_scenarios() {
    let targets = compute_targets(30, &funnel_weights(6, 2)).unwrap();
    let plan = plan_transfers(&[5; 6], &targets).unwrap();
    let moved_off_invalid: usize = plan.iter().filter(|t| t.from >= 2).map(|t| t.count()).sum();
    assert_eq!(moved_off_invalid, 20);
    assert!(plan.iter().all(|t| t.to < 2));

    // Funnel with an uneven valid side: rank 0 donates only what balancing requires.
    let targets = compute_targets(30, &funnel_weights(4, 2)).unwrap();
    let plan = plan_transfers(&[20, 0, 5, 5], &targets).unwrap();
    let from_zero: usize = plan.iter().filter(|t| t.from == 0).map(|t| t.count()).sum();
    assert_eq!(from_zero, 5);
}
