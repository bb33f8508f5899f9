use mesh_m2n::algs::collect::{M2nCollect, MpiDuplicate};
use mesh_m2n::algs::communicator::{Communicator, ThreadComm};
use mesh_m2n::algs::marshal::{CellBlock, CellBlockMarshaler, MeshFragment};
use mesh_m2n::config::ServerMode;
use mesh_m2n::net::MToNSocketConnection;
use mesh_m2n::net::registry::ConnectionRegistry;
use std::sync::{Mutex, mpsc};

mod util;
use util::*;

#[derive(Clone, Copy)]
enum Op {
    Collect,
    Duplicate,
}

fn execute(op: Op, comm: &ThreadComm, input: CellBlock, conn: &mut MToNSocketConnection) -> CellBlock {
    let out = match op {
        Op::Collect => M2nCollect::new(CellBlockMarshaler).execute(comm, input, Some(conn)),
        Op::Duplicate => MpiDuplicate::new(CellBlockMarshaler).execute(comm, input, Some(conn)),
    };
    out.expect("collect failed")
}

/// Connect `data_ranks` data-server ranks to `render_ranks` render-server
/// ranks over `connections` sockets, run `op` on both sides, and return
/// the per-rank outputs `(render, data)`.
fn run_pipeline(
    data_ranks: usize,
    render_ranks: usize,
    connections: usize,
    cells_per_rank: usize,
    op: Op,
) -> (Vec<CellBlock>, Vec<CellBlock>) {
    let (tx, rx) = mpsc::channel::<ConnectionRegistry>();
    let rx = Mutex::new(rx);

    std::thread::scope(|s| {
        let render = s.spawn(|| {
            run_world(render_ranks, |comm| {
                let mut conn = MToNSocketConnection::new(
                    comm.rank(),
                    config(ServerMode::RenderServer, connections),
                )
                .unwrap();
                conn.setup_wait_for_connection().unwrap();
                conn.gather_endpoints(comm).unwrap();
                if comm.rank() == 0 {
                    for _ in 0..data_ranks {
                        tx.send(conn.registry().clone()).unwrap();
                    }
                }
                conn.wait_for_connection().unwrap();
                execute(op, comm, CellBlock::default(), &mut conn)
            })
        });
        let data = s.spawn(|| {
            run_world(data_ranks, |comm| {
                let registry = rx.lock().unwrap().recv().unwrap();
                let mut conn = MToNSocketConnection::new(
                    comm.rank(),
                    config(ServerMode::DataServer, connections),
                )
                .unwrap();
                conn.set_registry(registry).unwrap();
                conn.connect().unwrap();
                execute(op, comm, cells(comm.rank(), cells_per_rank), &mut conn)
            })
        });
        (render.join().unwrap(), data.join().unwrap())
    })
}

#[test]
fn six_data_ranks_funnel_to_two_render_ranks() {
    let (render, data) = run_pipeline(6, 2, 2, 5, Op::Collect);
    let counts: Vec<usize> = render.iter().map(|b| b.num_cells()).collect();
    assert_eq!(counts, vec![15, 15]);
    assert!(data.iter().all(|b| b.num_cells() == 0));
    assert_eq!(origins(&render[0]), [[0u8; 5], [2; 5], [3; 5]].concat());
    assert_eq!(origins(&render[1]), [[1u8; 5], [4; 5], [5; 5]].concat());
}

#[test]
fn render_ranks_beyond_connections_get_nothing() {
    let (render, _) = run_pipeline(2, 3, 2, 4, Op::Collect);
    let counts: Vec<usize> = render.iter().map(|b| b.num_cells()).collect();
    assert_eq!(counts, vec![4, 4, 0]);
}

#[test]
fn one_to_one_moves_each_piece_unchanged() {
    let (render, _) = run_pipeline(3, 3, 3, 2, Op::Collect);
    for (rank, block) in render.iter().enumerate() {
        assert_eq!(block, &cells(rank, 2));
    }
}

#[test]
fn duplicate_gives_every_render_rank_the_union() {
    let (render, data) = run_pipeline(4, 2, 2, 3, Op::Duplicate);
    for block in &render {
        assert_eq!(block.num_cells(), 12);
        let mut o = origins(block);
        o.sort();
        assert_eq!(o, [[0u8; 3], [1; 3], [2; 3], [3; 3]].concat());
    }
    assert!(data.iter().all(|b| b.num_cells() == 0));
}
