//! End-to-end scenarios and cross-rank properties, driven entirely over
//! `SimComm` so the whole fold runs under plain `cargo test`.
use crystal_router::sim::build_world;
use crystal_router::{HostPlatform, Op, ParallelNode, Router, Trans};

fn run_ranks<F, T>(size: i32, body: F) -> Vec<T>
where
    F: Fn(i32, crystal_router::sim::SimComm) -> T + Send + Sync + Clone + 'static,
    T: Send + 'static,
{
    let world = build_world(size);
    let mut handles = Vec::new();
    for (rank, comm) in world.into_iter().enumerate() {
        let body = body.clone();
        handles.push(std::thread::spawn(move || body(rank as i32, comm)));
    }
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// spec.md §8 scenario: P = 2, two shared nodes.
#[test]
fn p2_two_shared_nodes() {
    let results = run_ranks(2, |rank, comm| {
        let other = 1 - rank;
        let shared = vec![ParallelNode::new(other, 1, 0), ParallelNode::new(other, 2, 1)];
        let mut router = Router::new(&shared, 2, 2, comm, HostPlatform).unwrap();
        let mut halo = if rank == 0 { vec![1.0, 2.0] } else { vec![10.0, 20.0] };
        router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
        halo
    });
    for halo in results {
        assert_eq!(&halo[..2], &[11.0, 22.0]);
    }
}

/// spec.md §8 scenario: P = 3, odd parity.
///
/// Global `A` shared by ranks {0, 1}; global `B` shared by ranks {1, 2}.
/// rank0 contributes A=1, rank1 contributes A=2,B=3, rank2 contributes B=5.
#[test]
fn p3_odd_parity() {
    const BASE_A: i64 = 100;
    const BASE_B: i64 = 200;

    let results = run_ranks(3, |rank, comm| match rank {
        0 => {
            let shared = vec![ParallelNode::new(1, BASE_A, 0)];
            let mut router = Router::new(&shared, 1, 1, comm, HostPlatform).unwrap();
            let mut halo = vec![1.0];
            router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
            halo
        }
        1 => {
            let shared = vec![ParallelNode::new(0, BASE_A, 0), ParallelNode::new(2, BASE_B, 1)];
            let mut router = Router::new(&shared, 2, 2, comm, HostPlatform).unwrap();
            let mut halo = vec![2.0, 3.0];
            router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
            halo
        }
        2 => {
            let shared = vec![ParallelNode::new(1, BASE_B, 0)];
            let mut router = Router::new(&shared, 1, 1, comm, HostPlatform).unwrap();
            let mut halo = vec![5.0];
            router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
            halo
        }
        _ => unreachable!(),
    });

    assert_eq!(&results[0][..1], &[3.0]); // rank0: A
    assert_eq!(&results[1][..2], &[3.0, 8.0]); // rank1: A, B
    assert_eq!(&results[2][..1], &[8.0]); // rank2: B
}

/// spec.md §8 scenario: P = 4, NoTrans vs Trans.
///
/// One global `G` shared by ranks {0(+), 1(-), 2(+), 3(-)} contributing
/// `[1, 2, 4, 8]`. Trans delivers 15 everywhere; NoTrans delivers 15 only to
/// the positively-signed ranks, leaving the others with their input.
#[test]
fn p4_no_trans_vs_trans() {
    const G: i64 = 7;
    let positive = [true, false, true, false];
    let values = [1.0, 2.0, 4.0, 8.0];

    let run = |trans: Trans| -> Vec<f64> {
        let world = build_world(4);
        let mut handles = Vec::new();
        for (rank, comm) in world.into_iter().enumerate() {
            let rank = rank as i32;
            handles.push(std::thread::spawn(move || {
                let shared: Vec<ParallelNode> = (0..4)
                    .filter(|&r| r != rank)
                    .map(|r| {
                        let base = if positive[r as usize] { G } else { -G };
                        ParallelNode::new(r, base, 0)
                    })
                    .collect();
                let n_halo_p = if positive[rank as usize] { 1 } else { 0 };
                let mut router = Router::new(&shared, n_halo_p, 1, comm, HostPlatform).unwrap();
                let mut halo = vec![values[rank as usize]];
                router.exchange(&mut halo, 1, Op::Add, trans).unwrap();
                halo[0]
            }));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    };

    let trans_result = run(Trans::Trans);
    assert_eq!(trans_result, vec![15.0, 15.0, 15.0, 15.0]);

    let no_trans_result = run(Trans::NoTrans);
    assert_eq!(no_trans_result[0], 15.0);
    assert_eq!(no_trans_result[2], 15.0);
    assert_eq!(no_trans_result[1], 2.0); // untouched, retains input
    assert_eq!(no_trans_result[3], 8.0); // untouched, retains input
}

/// spec.md §8 scenario: P = 1 is a complete no-op.
#[test]
fn p1_no_op() {
    let world = build_world(1);
    let comm = world.into_iter().next().unwrap();
    let mut router = Router::new(&[], 1, 1, comm, HostPlatform).unwrap();
    assert_eq!(router.n_levels(), 0);

    let mut halo = vec![123.0];
    router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
    assert_eq!(halo, vec![123.0]);
}

/// spec.md §8 scenario: k > 1 vector blocks.
#[test]
fn k_greater_than_one_vector_block() {
    let results = run_ranks(2, |rank, comm| {
        let other = 1 - rank;
        let shared = vec![ParallelNode::new(other, 1, 0)];
        let mut router = Router::new(&shared, 1, 1, comm, HostPlatform).unwrap();
        let mut halo = if rank == 0 {
            vec![1.0, 2.0, 3.0]
        } else {
            vec![10.0, 20.0, 30.0]
        };
        router.exchange(&mut halo, 3, Op::Add, Trans::Trans).unwrap();
        halo
    });
    for halo in results {
        assert_eq!(&halo[..3], &[11.0, 22.0, 33.0]);
    }
}

/// spec.md §8 scenario: repeated exchange (Add, then Max) matches running
/// each independently from fresh inputs — the router's level descriptors
/// carry no cross-exchange state.
#[test]
fn repeated_exchange_matches_fresh_runs() {
    fn build(rank: i32, comm: crystal_router::sim::SimComm) -> Router<crystal_router::sim::SimComm, HostPlatform> {
        let other = 1 - rank;
        let shared = vec![ParallelNode::new(other, 1, 0)];
        Router::new(&shared, 1, 1, comm, HostPlatform).unwrap()
    }

    let reused = run_ranks(2, |rank, comm| {
        let mut router = build(rank, comm);
        let mut add_halo = if rank == 0 { vec![3.0] } else { vec![4.0] };
        router.exchange(&mut add_halo, 1, Op::Add, Trans::Trans).unwrap();

        let mut max_halo = if rank == 0 { vec![3.0] } else { vec![4.0] };
        router.exchange(&mut max_halo, 1, Op::Max, Trans::Trans).unwrap();
        (add_halo[0], max_halo[0])
    });

    let fresh_add = run_ranks(2, |rank, comm| {
        let mut router = build(rank, comm);
        let mut halo = if rank == 0 { vec![3.0] } else { vec![4.0] };
        router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
        halo[0]
    });
    let fresh_max = run_ranks(2, |rank, comm| {
        let mut router = build(rank, comm);
        let mut halo = if rank == 0 { vec![3.0] } else { vec![4.0] };
        router.exchange(&mut halo, 1, Op::Max, Trans::Trans).unwrap();
        halo[0]
    });

    for (rank, &(add, max)) in reused.iter().enumerate() {
        assert_eq!(add, fresh_add[rank]);
        assert_eq!(max, fresh_max[rank]);
    }
}

/// spec.md §8 property 8: commutativity over participants — which rank is
/// assigned which contribution doesn't change the reduced sum under Add.
#[test]
fn commutes_over_which_rank_holds_which_contribution() {
    const G: i64 = 9;

    let run_with = |values: [f64; 4]| -> Vec<f64> {
        let world = build_world(4);
        let mut handles = Vec::new();
        for (rank, comm) in world.into_iter().enumerate() {
            let rank = rank as i32;
            handles.push(std::thread::spawn(move || {
                let shared: Vec<ParallelNode> = (0..4).filter(|&r| r != rank).map(|r| ParallelNode::new(r, G, 0)).collect();
                let mut router = Router::new(&shared, 1, 1, comm, HostPlatform).unwrap();
                let mut halo = vec![values[rank as usize]];
                router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
                halo[0]
            }));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    };

    let a = run_with([1.0, 2.0, 4.0, 8.0]);
    let b = run_with([8.0, 4.0, 2.0, 1.0]);
    assert_eq!(a, vec![15.0; 4]);
    assert_eq!(b, vec![15.0; 4]);
}

/// spec.md §8 property 5: buffer-size law.
#[test]
fn buffer_bounds_cover_every_level() {
    let world = build_world(4);
    let mut handles = Vec::new();
    for (rank, comm) in world.into_iter().enumerate() {
        handles.push(std::thread::spawn(move || {
            let rank = rank as i32;
            let shared: Vec<ParallelNode> = (0..4).filter(|&r| r != rank).map(|r| ParallelNode::new(r, 1, 0)).collect();
            let router = Router::new(&shared, 1, 1, comm, HostPlatform).unwrap();
            router.buffer_bounds()
        }));
    }
    for h in handles {
        let (send_max, recv_max) = h.join().unwrap();
        assert!(send_max >= 1);
        assert!(recv_max >= 1);
    }
}

/// spec.md §8 property 3: idempotence of setup.
#[test]
fn setup_is_idempotent_across_fresh_routers() {
    let build_levels = || -> Vec<usize> {
        run_ranks(3, |rank, comm| {
            let shared: Vec<ParallelNode> = match rank {
                0 => vec![ParallelNode::new(1, 1, 0)],
                1 => vec![ParallelNode::new(0, 1, 0), ParallelNode::new(2, 2, 1)],
                2 => vec![ParallelNode::new(1, 2, 0)],
                _ => unreachable!(),
            };
            let n_halo = if rank == 1 { 2 } else { 1 };
            let router = Router::new(&shared, n_halo, n_halo, comm, HostPlatform).unwrap();
            router.n_levels()
        })
    };

    assert_eq!(build_levels(), build_levels());
}
