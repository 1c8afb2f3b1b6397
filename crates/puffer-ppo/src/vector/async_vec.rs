//! Threaded backend: runs any `VecEnv` on a worker thread so that
//! environment stepping overlaps with inference on the caller's thread.

use super::vecenv::{RecvBatch, VecEnv};
use crate::env::Frame;
use crate::spaces::DynSpace;
use crate::{PufferError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::thread::{spawn, JoinHandle};
use tch::Tensor;

enum Command {
    Reset(Option<u64>),
    Step(Tensor),
    Render,
    Close,
}

enum Response {
    Batch(Result<RecvBatch>),
    Frame(Result<Option<Frame>>),
}

/// Async vectorized environment backend
pub struct AsyncVecEnv {
    cmd_tx: Sender<Command>,
    res_rx: Receiver<Response>,
    worker: Option<JoinHandle<()>>,
    obs_space: DynSpace,
    action_space: DynSpace,
    num_agents: usize,
    controlled_num_agents: usize,
    /// Reset/step requests whose batch has not been received yet
    in_flight: usize,
    /// Batch that arrived while waiting for a render
    stashed: Option<Result<RecvBatch>>,
}

impl AsyncVecEnv {
    /// Create a new async backend wrapping another backend
    pub fn new<B: VecEnv + 'static>(mut backend: B) -> Self {
        let obs_space = backend.single_observation_space();
        let action_space = backend.action_space();
        let num_agents = backend.num_agents();
        let controlled_num_agents = backend.controlled_num_agents();

        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let (res_tx, res_rx) = bounded(2);

        let worker = spawn(move || {
            while let Ok(cmd) = cmd_rx.recv() {
                let response = match cmd {
                    Command::Reset(seed) => {
                        Response::Batch(backend.async_reset(seed).and_then(|_| backend.recv()))
                    }
                    Command::Step(actions) => {
                        Response::Batch(backend.step(&actions).and_then(|_| backend.recv()))
                    }
                    Command::Render => Response::Frame(backend.render()),
                    Command::Close => {
                        backend.close();
                        break;
                    }
                };
                if res_tx.send(response).is_err() {
                    break;
                }
            }
        });

        Self {
            cmd_tx,
            res_rx,
            worker: Some(worker),
            obs_space,
            action_space,
            num_agents,
            controlled_num_agents,
            in_flight: 0,
            stashed: None,
        }
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| PufferError::Env("environment worker has exited".into()))
    }

    fn next_response(&self) -> Result<Response> {
        self.res_rx
            .recv()
            .map_err(|_| PufferError::Env("environment worker has exited".into()))
    }
}

impl VecEnv for AsyncVecEnv {
    fn single_observation_space(&self) -> DynSpace {
        self.obs_space.clone()
    }

    fn action_space(&self) -> DynSpace {
        self.action_space.clone()
    }

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn controlled_num_agents(&self) -> usize {
        self.controlled_num_agents
    }

    fn async_reset(&mut self, seed: Option<u64>) -> Result<()> {
        self.send(Command::Reset(seed))?;
        self.in_flight += 1;
        Ok(())
    }

    fn recv(&mut self) -> Result<RecvBatch> {
        if let Some(batch) = self.stashed.take() {
            self.in_flight -= 1;
            return batch;
        }
        if self.in_flight == 0 {
            return Err(PufferError::Env("recv called with no reset or step in flight".into()));
        }
        loop {
            if let Response::Batch(batch) = self.next_response()? {
                self.in_flight -= 1;
                return batch;
            }
        }
    }

    fn step(&mut self, actions: &Tensor) -> Result<()> {
        self.send(Command::Step(actions.detach().copy()))?;
        self.in_flight += 1;
        Ok(())
    }

    fn render(&mut self) -> Result<Option<Frame>> {
        self.send(Command::Render)?;
        loop {
            match self.next_response()? {
                Response::Frame(frame) => return frame,
                Response::Batch(batch) => self.stashed = Some(batch),
            }
        }
    }

    fn close(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AsyncVecEnv {
    fn drop(&mut self) {
        self.close();
    }
}
