//! Four data-server ranks funnel their cells onto three render-server
//! ranks over loopback sockets, all inside one process. Only render ranks
//! 0 and 1 hold a socket; rank 2 ends up empty.
//!
//! Each group is a `ThreadComm` world; the render side publishes its
//! endpoint registry to the data side through a channel.
//!
//! Run with: `cargo run --example local_m2n`

use mesh_m2n::prelude::*;
use std::sync::{Mutex, mpsc};

const DATA_RANKS: usize = 4;
const RENDER_RANKS: usize = 3;
const CONNECTIONS: usize = 2;

fn config(mode: ServerMode) -> M2nConfig {
    M2nConfig {
        mode,
        number_of_connections: CONNECTIONS,
        wait_timeout_ms: Some(30_000),
        ..Default::default()
    }
}

fn in_world<T, F>(size: usize, f: F) -> Vec<Result<T, M2nError>>
where
    T: Send,
    F: Fn(&ThreadComm) -> Result<T, M2nError> + Sync,
{
    let world = ThreadComm::world(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(M2nError::InvalidConfig("rank panicked".into()))))
            .collect()
    })
}

fn main() -> Result<(), M2nError> {
    let (tx, rx) = mpsc::channel::<ConnectionRegistry>();
    let rx = Mutex::new(rx);

    let (render, data) = std::thread::scope(|s| {
        let render = s.spawn(|| {
            in_world(RENDER_RANKS, |comm| {
                let mut conn = MToNSocketConnection::new(comm.rank(), config(ServerMode::RenderServer))?;
                conn.setup_wait_for_connection()?;
                conn.gather_endpoints(comm)?;
                if comm.rank() == 0 {
                    for _ in 0..DATA_RANKS {
                        let _ = tx.send(conn.registry().clone());
                    }
                }
                let peer = conn.wait_for_connection()?;
                let out = M2nCollect::new(CellBlockMarshaler).execute(comm, CellBlock::default(), Some(&mut conn))?;
                Ok((peer, out.num_cells()))
            })
        });
        let data = s.spawn(|| {
            in_world(DATA_RANKS, |comm| {
                let registry = rx
                    .lock()
                    .map_err(|_| M2nError::InvalidConfig("registry channel poisoned".into()))?
                    .recv()
                    .map_err(|_| M2nError::InvalidConfig("render side never published".into()))?;
                let mut conn = MToNSocketConnection::new(comm.rank(), config(ServerMode::DataServer))?;
                conn.set_registry(registry)?;
                let peer = conn.connect()?;
                let cells: CellBlock = (0..5 + comm.rank())
                    .map(|i| format!("cell {i} of rank {}", comm.rank()).into_bytes())
                    .collect();
                let out = M2nCollect::new(CellBlockMarshaler).execute(comm, cells, Some(&mut conn))?;
                Ok((peer, out.num_cells()))
            })
        });
        (render.join(), data.join())
    });

    let render = render.map_err(|_| M2nError::InvalidConfig("render group panicked".into()))?;
    let data = data.map_err(|_| M2nError::InvalidConfig("data group panicked".into()))?;
    for (rank, res) in data.into_iter().enumerate() {
        let (peer, kept) = res?;
        println!("data rank {rank}: peer {peer:?}, {kept} cells left locally");
    }
    for (rank, res) in render.into_iter().enumerate() {
        let (peer, received) = res?;
        println!("render rank {rank}: peer {peer:?}, received {received} cells");
    }
    Ok(())
}
