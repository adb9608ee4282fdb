use anyhow::Result;
use clap::Parser;
use npc_dialogue::services::prompt_builder;
use npc_dialogue::{
    ActorRef, CompressionCoordinator, ConversationId, ConversationStore, ConversationSummarizer,
    HistoryPolicy, InMemoryRegistry, InferenceEngine, LlmService, MaintenanceSweeper,
    MemoryPressureProbe, OptimizationLevel, ReplyDispatcher, RetentionPolicy, Role, Settings,
    SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const PLAYER: ActorRef = ActorRef(1);

/// Cadence for collecting finished replies and compressions
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "npc-dialogue-host")]
#[command(about = "Talk to an NPC from the terminal; /bye ends the conversation, /quit exits")]
struct Cli {
    /// Settings file, without extension
    #[arg(short, long, env = "NPC_DIALOGUE_CONFIG", default_value = "config/settings")]
    config: String,

    #[arg(long, default_value = "Lamar")]
    npc: String,

    /// Actor handle of the NPC
    #[arg(long, default_value_t = 7)]
    npc_actor: i32,

    #[arg(long, default_value = "Player")]
    player: String,

    #[arg(long, default_value = "Grove Street")]
    location: String,

    #[arg(long, default_value = "clear")]
    weather: String,

    /// Per-session optimization level (0-3), overrides the configured default
    #[arg(long)]
    level: Option<u8>,
}

struct Host {
    cli: Cli,
    store: Arc<ConversationStore>,
    sweeper: MaintenanceSweeper,
    coordinator: CompressionCoordinator,
    summarizer: ConversationSummarizer,
    probe: MemoryPressureProbe,
    replies: ReplyDispatcher,
    current: Option<ConversationId>,
}

impl Host {
    fn new(cli: Cli, settings: Settings) -> Result<Self> {
        let runtime = Handle::current();
        let engine: Arc<dyn InferenceEngine> = Arc::new(LlmService::new(settings.llm.clone())?);

        let store = Arc::new(ConversationStore::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(SystemClock),
            HistoryPolicy::from(&settings.conversation),
        ));
        let sweeper = MaintenanceSweeper::new(store.clone(), RetentionPolicy::from(&settings.maintenance));
        let coordinator = CompressionCoordinator::new(
            engine.clone(),
            runtime.clone(),
            settings.optimizer.clone(),
            store.metrics().clone(),
        );
        let summarizer = ConversationSummarizer::new(
            store.clone(),
            engine.clone(),
            runtime.clone(),
            settings.summary.clone(),
        );
        let replies = ReplyDispatcher::new(engine, runtime, settings.llm.max_tokens);
        let probe = MemoryPressureProbe::new(settings.optimizer.pressure_threshold);

        Ok(Self {
            cli,
            store,
            sweeper,
            coordinator,
            summarizer,
            probe,
            replies,
            current: None,
        })
    }

    fn npc(&self) -> ActorRef {
        ActorRef(self.cli.npc_actor)
    }

    /// Returns false when the session should end
    fn handle_input(&mut self, input: &str) -> Result<bool> {
        match input.trim() {
            "" => Ok(true),
            "/quit" => Ok(false),
            "/bye" => {
                self.end_current();
                Ok(true)
            }
            "/stats" => {
                info!(stats = ?self.store.stats(), metrics = ?self.store.metrics().snapshot(), "Store statistics");
                Ok(true)
            }
            text => {
                self.player_turn(text)?;
                Ok(true)
            }
        }
    }

    fn ensure_conversation(&mut self) -> Result<ConversationId> {
        if let Some(id) = self.current.filter(|id| self.store.is_active(*id)) {
            return Ok(id);
        }

        let resumed = self.store.active_conversation_id(PLAYER);
        let id = self.store.open_conversation(PLAYER, self.npc(), resumed)?;
        self.store.set_context(id, &self.cli.location, &self.cli.weather);
        if let Some(level) = self.cli.level {
            self.coordinator
                .set_conversation_profile(id, OptimizationLevel::from_level(level));
        }
        self.current = Some(id);
        Ok(id)
    }

    /// Record the player line and hand the reply to a background task
    fn player_turn(&mut self, text: &str) -> Result<()> {
        let id = self.ensure_conversation()?;
        self.store.append_message(id, Role::from_speaker(&self.cli.player), text);
        self.apply_compression();

        let history = self.store.history(id);
        let context = self.store.context(id);
        let prompt = prompt_builder::reply_prompt(&self.cli.npc, context.as_ref(), &history);
        if !self.replies.request(id, prompt) {
            debug!("{} is still answering, turn queued in history", self.cli.npc);
        }
        Ok(())
    }

    fn collect_reply(&self) {
        let Some((id, reply)) = self.replies.poll() else {
            return;
        };
        if !self.store.is_active(id) {
            return;
        }
        self.store.append_message(id, Role::from_speaker(&self.cli.npc), &reply);
        println!("{}: {}", self.cli.npc, reply);
    }

    fn end_current(&mut self) {
        let Some(id) = self.current.take() else {
            return;
        };
        self.coordinator.clear_profile(id);
        self.summarizer.end_conversation(id, &self.cli.npc, &self.cli.player);
    }

    /// Poll the compression job against the conversation it was started for.
    /// A closed conversation yields an empty history, so its result is discarded.
    fn apply_compression(&self) {
        let Some(id) = self.coordinator.in_flight_conversation() else {
            return;
        };
        let mut history = self.store.history(id);
        if self.coordinator.apply_pending(id, &mut history) {
            self.store.replace_history(id, history);
        }
    }

    fn frame_tick(&self) {
        self.collect_reply();
        self.apply_compression();
    }

    fn maintenance_tick(&self) {
        self.sweeper.sweep();
        self.summarizer.reap_finished();
    }

    fn optimizer_tick(&self) {
        self.coordinator.set_resource_pressure(self.probe.is_under_pressure());
        let Some(id) = self.current else {
            return;
        };
        let history = self.store.history(id);
        self.coordinator
            .check_and_optimize(id, &history, &self.cli.npc, &self.cli.player);
    }

    async fn shutdown(&mut self) {
        self.end_current();
        self.replies.shutdown();
        self.coordinator.shutdown();
        self.summarizer.shutdown().await;
        info!(metrics = ?self.store.metrics().snapshot(), "Host stopped");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,npc_dialogue=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    info!("Starting NPC dialogue host...");

    let settings = Settings::load_from(&cli.config)?;
    info!("Configuration loaded");

    let maintenance_every = Duration::from_millis(settings.maintenance.sweep_interval_ms.max(1));
    let optimize_every = Duration::from_millis(settings.optimizer.check_interval_ms.max(1));

    let mut host = Host::new(cli, settings)?;
    let mut frame = tokio::time::interval(FRAME_INTERVAL);
    let mut maintenance = tokio::time::interval(maintenance_every);
    let mut optimize = tokio::time::interval(optimize_every);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Talking to {}. /bye ends the conversation, /quit exits.", host.cli.npc);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !host.handle_input(&line)? {
                    break;
                }
            }
            _ = frame.tick() => host.frame_tick(),
            _ = maintenance.tick() => host.maintenance_tick(),
            _ = optimize.tick() => host.optimizer_tick(),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    host.shutdown().await;
    Ok(())
}
