use std::cmp;
use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::{ServerConfig, WEIGHT_MARKER};
use crate::logger::{self, EventLog};
use crate::net::{self, SessionEvents};
use crate::pool::WorkerPool;
use crate::record::{self, RecordFile};
use crate::state::SharedState;
use crate::worker::{sanitize, Message, Role, WorkerSession};
use crate::Result;

/// Sleep while the self-play queue is empty
const QUEUE_POLL: Duration = Duration::from_millis(100);
/// Re-dispatch period while waiting for `Optimization_Done`
const DISPATCH_RETRY: Duration = Duration::from_millis(100);

/// The coordination server: iteration controller plus worker-pool plumbing.
///
/// One instance owns the event logs, the shared state, the worker pool and
/// the RNG; worker sessions reach all of them through the [`SessionEvents`]
/// implementation, driven by the per-connection reader threads.
pub struct TrainServer {
    config: ServerConfig,
    logger: EventLog,
    state: SharedState,
    pool: WorkerPool,
    rng: Mutex<StdRng>,
    session_ids: AtomicUsize,
}

impl TrainServer {
    /// Creates the server: seeds the RNG, opens the event logs, parses the
    /// initial model iteration from the configured weight filename and
    /// prepares the record directory
    pub fn new(config: ServerConfig) -> Result<Self> {
        let seed = if config.auto_seed {
            wall_clock_seed()
        } else {
            config.seed
        };
        let model_iteration = config.initial_model_iteration()?;
        fs::create_dir_all(config.record_dir())?;
        let logger = EventLog::create(&config.training_dir)?;
        Ok(Self {
            config,
            logger,
            state: SharedState::new(model_iteration),
            pool: WorkerPool::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            session_ids: <_>::default(),
        })
    }
    /// Run configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
    /// Binds the configured address and runs the iteration loop to completion
    pub fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind)?;
        self.serve(listener)
    }
    /// Runs the iteration loop against an already-bound listener.
    ///
    /// The accept and keep-alive threads run for the lifetime of the
    /// process; the call returns once the configured end iteration has
    /// completed and every worker has been told to quit.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        Self::start_accepting(&self, listener)?;
        Self::start_keep_alive(&self)?;
        eprintln!("{}Server initialize over.", logger::timestamp());

        for iteration in self.config.start_iteration..=self.config.end_iteration {
            self.self_play(iteration)?;
            self.optimization(iteration)?;
        }

        self.pool.quit();
        Ok(())
    }
    /// Broadcasts `quit` and terminates the process; used by the signal path
    pub fn shutdown(&self) -> ! {
        self.pool.quit();
        std::process::exit(0);
    }
    fn start_accepting(server: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let server = server.clone();
        thread::Builder::new()
            .name("accept".into())
            .spawn(move || net::serve(listener, server))?;
        Ok(())
    }
    fn start_keep_alive(server: &Arc<Self>) -> Result<()> {
        let server = server.clone();
        thread::Builder::new()
            .name("keepalive".into())
            .spawn(move || loop {
                thread::sleep(server.config.keep_alive_period());
                for session in server.pool.keep_alive() {
                    if let Err(e) = server.drop_session(&session) {
                        crate::critical(&format!("event log failure: {}", e));
                    }
                }
            })?;
        Ok(())
    }
    /// One self-play phase: collects the per-iteration quota of fresh game
    /// records into `sgf/<iteration>.sgf`
    fn self_play(&self, iteration: i64) -> Result<()> {
        let mut records = RecordFile::create(&self.config.record_dir(), iteration)?;
        self.logger
            .training(&format!("[Iteration] ====={}=====", iteration))?;
        self.logger
            .training(&format!("[SelfPlay] Start {}", self.state.model_iteration()))?;

        let quota = self.config.games_per_iteration;
        let progress_step = quota / 4;
        let mut game_length_sum: u64 = 0;
        while records.len() < quota {
            self.pool
                .broadcast_self_play(&self.config.weight_path(self.state.model_iteration()));

            let Some(game) = self.state.pop_record() else {
                thread::sleep(QUEUE_POLL);
                continue;
            };
            if !self.config.accept_different_model_games
                && !record::embeds_model(&game, self.state.model_iteration())
            {
                // produced by a previous model, discard
                continue;
            }
            let Ok((moves, payload)) = record::split_record(&game) else {
                continue;
            };
            let Ok(move_count) = moves.parse::<u64>() else {
                continue;
            };
            records.append(moves, payload)?;
            game_length_sum += move_count;
            if progress_step > 0 && records.len() % progress_step == 0 {
                self.logger.training(&format!(
                    "[SelfPlay Progress] {} / {}",
                    records.len(),
                    quota
                ))?;
            }
        }

        self.pool.stop_job(Role::SelfPlay);
        drop(records);
        self.logger.training("[SelfPlay] Finished.")?;
        self.logger.training(&format!(
            "[SelfPlay Game Lengths] {}",
            game_length_sum as f64 / quota as f64
        ))?;
        Ok(())
    }
    /// One optimization phase: dispatches the pass over the replay-buffer
    /// window and waits for a worker to announce the new model iteration
    fn optimization(&self, iteration: i64) -> Result<()> {
        self.logger.training("[Optimization] Start.")?;

        let command = format!(
            "{}{}.pkl {} {}",
            WEIGHT_MARKER,
            self.state.model_iteration(),
            cmp::max(1, iteration - self.config.replay_buffer + 1),
            iteration
        );
        self.state.begin_optimization();
        loop {
            // workers joining mid-phase pick the job up on the next sweep
            self.pool.dispatch_optimization(&command);
            if self.state.wait_optimization_done(DISPATCH_RETRY) {
                break;
            }
        }
        self.pool.stop_job(Role::Optimization);

        self.logger.training("[Optimization] Finished.")?;
        Ok(())
    }
    /// The close path of a session: the first close logs the disconnection,
    /// pool removal is idempotent
    fn drop_session(&self, session: &Arc<WorkerSession>) -> Result<()> {
        if session.close() {
            self.logger.worker(&format!(
                "[Worker Disconnection] {} {}",
                session.name(),
                session.role_str()
            ))?;
        }
        self.pool.remove(session.id());
        Ok(())
    }
    fn handle_info(&self, session: &Arc<WorkerSession>, name: &str, role: &str) -> Result<()> {
        let parsed = Role::parse(role);
        session.identify(name, parsed);
        self.logger
            .worker(&format!("[Worker Connection] {} {}", name, role))?;
        let Some(role) = parsed else {
            return self.drop_session(session);
        };
        let handshake = match role {
            Role::SelfPlay => self.self_play_job(),
            Role::Optimization => {
                format!("Job_Optimization {}", self.config.training_dir.display())
            }
        };
        let _r = session.write_line(&handshake);
        session.set_idle(true);
        Ok(())
    }
    /// The initial self-play job spec, carrying the current weight path and
    /// a per-worker seed drawn from the server RNG
    fn self_play_job(&self) -> String {
        let seed: u32 = self.rng.lock().random();
        format!(
            "Job_SelfPlay {} nn_file_name={}:program_auto_seed=false:program_seed={}:program_quiet=true",
            self.config.training_dir.display(),
            self.config.weight_path(self.state.model_iteration()),
            seed
        )
    }
    fn handle_self_play(&self, line: &str, game: &str) -> Result<()> {
        if record::is_concatenated(line) {
            // two records glued into one line by a non-atomic worker write
            return Ok(());
        }
        let queued = self.state.push_record(game.to_owned());
        let progress_step = self.config.games_per_iteration / 4;
        if progress_step > 0 && queued % progress_step == 0 {
            self.logger
                .worker(&format!("[SelfPlay Game Buffer] {} games", queued))?;
        }
        Ok(())
    }
}

impl SessionEvents for TrainServer {
    fn on_connect(&self, stream: TcpStream, addr: SocketAddr) -> Result<Arc<WorkerSession>> {
        let id = self.session_ids.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(WorkerSession::new(id, stream, addr));
        self.pool.add(session.clone());
        debug!(%addr, id, "worker connected");
        Ok(session)
    }
    fn on_message(&self, session: &Arc<WorkerSession>, line: &str) -> Result<()> {
        match Message::parse(line) {
            Ok(Message::Info { name, role }) => self.handle_info(session, name, role),
            Ok(Message::SelfPlay { record }) => self.handle_self_play(line, record),
            Ok(Message::OptimizationDone { model_iteration }) => {
                self.state.finish_optimization(model_iteration);
                Ok(())
            }
            Err(_) => {
                self.logger
                    .worker(&format!("[Worker Error] {}", sanitize(line)))?;
                self.drop_session(session)
            }
        }
    }
    fn on_close(&self, session: &Arc<WorkerSession>) -> Result<()> {
        self.drop_session(session)
    }
}

fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
