//! Per-connection session orchestration.
//!
//! A session reads the init handshake, resolves the language recipe, writes
//! the source into a private workspace, optionally compiles it, then runs it
//! interactively through the [`IoBridge`]. Every path out of a session,
//! including failures, removes the workspace and every container it created
//! before the final event is sent.

mod state;

pub use state::{IllegalTransition, SessionEvent, SessionState};

use coderun_types::{ClientMessage, InitRequest, OutputStream, ServerEvent, Stage};
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

use crate::bridge::IoBridge;
use crate::config::EngineConfig;
use crate::driver::{CompileOutcome, ContainerDriver};
use crate::errors::EngineError;
use crate::recipes::{Recipe, RecipeRegistry};
use crate::runtime::ContainerRuntime;
use crate::sink::EventSink;
use crate::workspace::Workspace;

/// Shared entry point for running sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionEngine {
    runtime: Arc<dyn ContainerRuntime>,
    recipes: Arc<RecipeRegistry>,
    config: Arc<EngineConfig>,
}

impl SessionEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        recipes: RecipeRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            runtime,
            recipes: Arc::new(recipes),
            config: Arc::new(config),
        }
    }

    /// Engine over the built-in recipes, honouring the configured image.
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: EngineConfig) -> Self {
        let recipes = match &config.image {
            Some(image) => RecipeRegistry::with_image(image),
            None => RecipeRegistry::builtin(),
        };
        Self::new(runtime, recipes, config)
    }

    pub fn recipes(&self) -> &RecipeRegistry {
        &self.recipes
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive one session to completion over an established connection.
    ///
    /// `inbound` yields the client's text frames; the stream ending means the
    /// client went away. Events go to `events`. Returns the terminal state.
    pub async fn run_session<S, E>(&self, mut inbound: S, events: EventSink) -> SessionState
    where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
    {
        let mut session = Session {
            id: short_session_id(),
            state: SessionState::AwaitingInit,
            engine: self,
            events,
        };
        log::info!("[{}] session opened", session.id);

        if let Err(e) = session.execute(&mut inbound).await {
            session.fail(e).await;
        }

        log::info!("[{}] session ended in state {}", session.id, session.state);
        session.state
    }
}

fn short_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

struct Session<'a> {
    id: String,
    state: SessionState,
    engine: &'a SessionEngine,
    events: EventSink,
}

impl Session<'_> {
    fn advance(&mut self, event: SessionEvent) {
        match self.state.transition(event) {
            Ok(next) => {
                log::debug!("[{}] {} -> {}", self.id, self.state, next);
                self.state = next;
            }
            Err(e) => {
                log::error!("[{}] {}", self.id, e);
                self.state = SessionState::Failed;
            }
        }
    }

    async fn emit(&self, event: ServerEvent) {
        self.events.emit(event).await;
    }

    async fn fail(&mut self, error: EngineError) {
        match &error {
            EngineError::Transport(_) => log::info!("[{}] {}", self.id, error),
            _ => log::error!("[{}] session failed: {}", self.id, error),
        }
        if !self.state.is_terminal() {
            self.advance(SessionEvent::Failure);
        }
        self.emit(ServerEvent::error(error.client_message())).await;
    }

    async fn execute<S, E>(&mut self, inbound: &mut S) -> Result<(), EngineError>
    where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
    {
        let init = self.read_init(inbound).await?;
        let recipe = self
            .engine
            .recipes
            .resolve(&init.language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(init.language.clone()))?;
        let source = init.source();
        if source.is_empty() {
            return Err(EngineError::EmptySource);
        }
        log::info!(
            "[{}] {} program accepted ({} bytes)",
            self.id,
            recipe.language,
            source.len()
        );

        let workspace = Workspace::materialize(&self.engine.config, &recipe, source).await?;
        self.emit(ServerEvent::runtime(
            init.language.as_str(),
            init.version_or(recipe.version),
        ))
        .await;

        let result = self.execute_in(&recipe, &workspace, inbound).await;
        if let Err(e) = workspace.close() {
            log::warn!("[{}] {}", self.id, e);
        }
        result
    }

    async fn read_init<S, E>(&self, inbound: &mut S) -> Result<InitRequest, EngineError>
    where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
    {
        let deadline = self.engine.config.init_timeout();
        let frame = tokio::time::timeout(deadline, inbound.next())
            .await
            .map_err(|_| EngineError::InitTimeout(deadline))?;
        match frame {
            Some(Ok(text)) => Ok(InitRequest::parse(&text)?),
            Some(Err(e)) => Err(EngineError::Transport(e.to_string())),
            None => Err(EngineError::Transport(
                "connection closed before init".to_string(),
            )),
        }
    }

    async fn execute_in<S, E>(
        &mut self,
        recipe: &Recipe,
        workspace: &Workspace,
        inbound: &mut S,
    ) -> Result<(), EngineError>
    where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
    {
        let driver = ContainerDriver::new(self.engine.runtime.clone(), self.id.clone());

        if recipe.needs_compile() {
            self.advance(SessionEvent::InitCompiled);
            self.emit(ServerEvent::stage(Stage::Compile)).await;

            let outcome = self.compile(&driver, recipe, workspace, inbound).await?;
            if !outcome.output.is_empty() {
                self.emit(ServerEvent::output(OutputStream::Stderr, &outcome.output))
                    .await;
            }
            if outcome.exit_code != 0 {
                log::info!(
                    "[{}] compilation failed with exit code {}",
                    self.id,
                    outcome.exit_code
                );
                self.emit(ServerEvent::exit(Stage::Compile, outcome.exit_code))
                    .await;
                self.advance(SessionEvent::CompileFailed);
                return Ok(());
            }
            self.advance(SessionEvent::CompileSucceeded);
        } else {
            self.advance(SessionEvent::InitInterpreted);
        }

        self.emit(ServerEvent::stage(Stage::Run)).await;
        let mut container = driver.start_run(recipe, workspace).await?;
        let Some(io) = container.take_io() else {
            container.release().await;
            return Err(EngineError::container(
                "Failed to attach to container",
                EngineError::runtime("attached streams already taken"),
            ));
        };

        IoBridge::new(container.handle(), &self.events, &self.engine.config, &self.id)
            .run(io, inbound)
            .await;
        container.release().await;
        self.advance(SessionEvent::RunFinished);
        Ok(())
    }

    /// Run the compile container while watching the connection. Frames that
    /// arrive before the program runs are dropped; a lost connection aborts
    /// the compile.
    async fn compile<S, E>(
        &self,
        driver: &ContainerDriver,
        recipe: &Recipe,
        workspace: &Workspace,
        inbound: &mut S,
    ) -> Result<CompileOutcome, EngineError>
    where
        S: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
    {
        let compile = driver.run_compile(recipe, workspace);
        tokio::pin!(compile);

        loop {
            tokio::select! {
                outcome = &mut compile => return outcome,
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.drop_early_frame(&text),
                    Some(Err(e)) => return Err(EngineError::Transport(e.to_string())),
                    None => {
                        return Err(EngineError::Transport(
                            "client disconnected during compilation".to_string(),
                        ))
                    }
                },
            }
        }
    }

    fn drop_early_frame(&self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Stdin(_)) if !self.state.accepts_stdin() => {
                log::debug!("[{}] dropping stdin sent while {}", self.id, self.state);
            }
            Ok(message) => {
                log::debug!("[{}] ignoring {:?} while {}", self.id, message, self.state);
            }
            Err(e) => log::debug!("[{}] ignoring undecodable frame: {}", self.id, e),
        }
    }
}
