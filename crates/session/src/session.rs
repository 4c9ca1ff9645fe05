use crate::state::{Message, ModelState, Role, Transition};
use crate::{Result, SessionError};
use futures::StreamExt;
use llmbench_engine::{EngineError, GenerationParams, InferenceEngine, ResponseStream, SYSTEM_PROMPT};
use llmbench_models::ModelDownloadState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Transitions buffered per subscriber before it starts lagging.
pub const TRANSITION_CAPACITY: usize = 256;

/// Loading indicator hook around `set_model_with_hooks`.
pub type LoadHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct QueryCallbacks {
    /// Engine failure while streaming. Not called on cancellation.
    pub on_error: Option<Box<dyn FnOnce(String) + Send>>,
    /// The answer stream completed.
    pub on_finish: Option<Box<dyn FnOnce() + Send>>,
}

struct GenerationJob {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum StreamOutcome {
    Completed,
    Cancelled,
    Failed(EngineError),
}

struct Inner {
    engine: tokio::sync::Mutex<Box<dyn InferenceEngine>>,
    params: GenerationParams,
    system_prompt: String,
    model: watch::Sender<Option<Arc<ModelDownloadState>>>,
    state: watch::Sender<ModelState>,
    messages: watch::Sender<Vec<Message>>,
    thinking: watch::Sender<bool>,
    transitions: broadcast::Sender<Transition>,
    job: Mutex<Option<GenerationJob>>,
    next_job_id: AtomicU64,
    scope: CancellationToken,
}

/// One chat session over an exclusively owned inference engine.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ModelSession {
    inner: Arc<Inner>,
}

fn reject(err: SessionError) -> SessionError {
    tracing::error!(error = %err, "session precondition violated");
    err
}

impl ModelSession {
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        Self::with_params(engine, GenerationParams::default(), SYSTEM_PROMPT)
    }

    pub fn with_params(
        engine: Box<dyn InferenceEngine>,
        params: GenerationParams,
        system_prompt: impl Into<String>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                engine: tokio::sync::Mutex::new(engine),
                params,
                system_prompt: system_prompt.into(),
                model: watch::Sender::new(None),
                state: watch::Sender::new(ModelState::NotLoaded),
                messages: watch::Sender::new(Vec::new()),
                thinking: watch::Sender::new(false),
                transitions,
                job: Mutex::new(None),
                next_job_id: AtomicU64::new(0),
                scope: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> ModelState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ModelState> {
        self.inner.state.subscribe()
    }

    /// Ordered stream of every state change from now on.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.inner.transitions.subscribe()
    }

    pub fn model(&self) -> Option<Arc<ModelDownloadState>> {
        self.inner.model.borrow().clone()
    }

    pub fn model_name(&self) -> Option<String> {
        self.inner.model_name()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.messages.subscribe()
    }

    /// True between sending a query and receiving its first chunk.
    pub fn is_thinking(&self) -> bool {
        *self.inner.thinking.borrow()
    }

    pub fn subscribe_thinking(&self) -> watch::Receiver<bool> {
        self.inner.thinking.subscribe()
    }

    pub fn has_active_job(&self) -> bool {
        self.inner.lock_job().is_some()
    }

    pub async fn set_model(&self, model: Arc<ModelDownloadState>) -> Result<()> {
        self.set_model_with_hooks(model, None, None).await
    }

    /// Assign `model` and load it, calling `on_start` before and `on_finish`
    /// after loading whatever its outcome.
    pub async fn set_model_with_hooks(
        &self,
        model: Arc<ModelDownloadState>,
        on_start: Option<LoadHook>,
        on_finish: Option<LoadHook>,
    ) -> Result<()> {
        if !model.is_downloaded() {
            return Err(reject(SessionError::NotDownloaded(
                model.model_name().to_string(),
            )));
        }
        if self.has_active_job() {
            return Err(reject(SessionError::GenerationActive));
        }

        tracing::info!(model = %model.model_name(), "model assigned");
        self.inner.model.send_replace(Some(model));

        if let Some(on_start) = on_start {
            on_start();
        }
        let loaded = self.load_model(true).await;
        if let Some(on_finish) = on_finish {
            on_finish();
        }
        loaded
    }

    /// (Re)create the engine for the assigned model.
    pub async fn load_model(&self, clear_messages: bool) -> Result<()> {
        let model = self.model().ok_or_else(|| reject(SessionError::NoModel))?;
        let file = model.file().ok_or_else(|| {
            reject(SessionError::ModelFileMissing(model.model_name().to_string()))
        })?;
        if self.has_active_job() {
            return Err(reject(SessionError::GenerationActive));
        }

        self.inner.set_state(ModelState::Loading);
        let mut engine = self.inner.engine.lock().await;
        engine.close();
        if clear_messages {
            self.inner.messages.send_replace(Vec::new());
        }

        tracing::info!(model = %model.model_name(), path = ?file, "loading model");
        let created = match engine.create(&file, &self.inner.params).await {
            Ok(()) => engine.add_system_prompt(&self.inner.system_prompt).await,
            Err(e) => Err(e),
        };
        if let Err(e) = created {
            engine.close();
            drop(engine);
            tracing::warn!(model = %model.model_name(), error = %e, "model load failed");
            self.inner.set_state(ModelState::NotLoaded);
            return Err(SessionError::LoadFailed(e));
        }
        drop(engine);

        self.inner
            .transition(|s| s == ModelState::Loading, ModelState::Ready);
        tracing::info!(model = %model.model_name(), "model ready");
        Ok(())
    }

    /// Close the engine. Rejected while a generation is running.
    pub async fn unload(&self) -> Result<()> {
        if self.has_active_job() {
            return Err(reject(SessionError::GenerationActive));
        }

        self.inner.engine.lock().await.close();
        self.inner.set_state(ModelState::NotLoaded);
        tracing::info!(model = ?self.model_name(), "model unloaded");
        Ok(())
    }

    /// Append `text` as a user message and stream the answer in the
    /// background. Must be called from within a tokio runtime.
    pub fn send_user_query(&self, text: impl Into<String>, callbacks: QueryCallbacks) -> Result<()> {
        let mut job = self.inner.lock_job();
        let state = self.state();
        if state != ModelState::Ready || job.is_some() {
            return Err(reject(SessionError::NotReady(state)));
        }
        let model_name = self
            .model_name()
            .ok_or_else(|| reject(SessionError::NoModel))?;

        let text = text.into();
        self.inner
            .messages
            .send_modify(|messages| messages.push(Message::user(text.clone())));
        // a concurrent stop may have left Ready since the check above
        if !self
            .inner
            .transition(|s| s == ModelState::Ready, ModelState::Answering)
        {
            self.inner.messages.send_modify(|messages| {
                messages.pop();
            });
            return Err(reject(SessionError::NotReady(self.state())));
        }
        self.inner.thinking.send_replace(true);

        let id = self.inner.next_job_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.scope.child_token();
        let handle = tokio::spawn(generate(
            Arc::clone(&self.inner),
            id,
            text,
            cancel.clone(),
            callbacks,
        ));
        *job = Some(GenerationJob { id, cancel, handle });

        tracing::info!(model = %model_name, job = id, "query sent");
        Ok(())
    }

    pub async fn stop_generation(&self) {
        self.stop_generation_with(|| {}).await
    }

    /// Cancel the running generation, if any, and return to `Ready`.
    ///
    /// `on_stop` runs only when there was a job to cancel. The future
    /// completes once the job has terminated. A no-op while another stop is
    /// in progress or when no model is loaded.
    pub async fn stop_generation_with<F>(&self, on_stop: F)
    where
        F: FnOnce() + Send,
    {
        let entered = self.inner.transition(
            |s| matches!(s, ModelState::Ready | ModelState::Answering),
            ModelState::Stopping,
        );
        if !entered {
            tracing::debug!(state = ?self.state(), "stop ignored");
            return;
        }

        let job = self.inner.lock_job().take();
        if let Some(job) = job {
            on_stop();
            job.cancel.cancel();
            if let Err(e) = job.handle.await {
                tracing::warn!(job = job.id, error = %e, "generation task ended abnormally");
            }
            tracing::info!(job = job.id, "generation stopped");
        }

        self.inner.thinking.send_replace(false);
        self.inner
            .transition(|s| s == ModelState::Stopping, ModelState::Ready);
    }

    pub async fn stop_and_unload(&self) -> Result<()> {
        self.stop_and_unload_with(|| {}).await
    }

    pub async fn stop_and_unload_with<F>(&self, on_stop: F) -> Result<()>
    where
        F: FnOnce() + Send,
    {
        self.stop_generation_with(on_stop).await;
        self.unload().await
    }

    /// Cancel every task the session owns.
    pub fn shutdown(&self) {
        self.inner.scope.cancel();
    }
}

impl Inner {
    fn lock_job(&self) -> MutexGuard<'_, Option<GenerationJob>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn model_name(&self) -> Option<String> {
        self.model
            .borrow()
            .as_ref()
            .map(|m| m.model_name().to_string())
    }

    fn set_state(&self, next: ModelState) -> bool {
        self.transition(|s| s != next, next)
    }

    /// Move to `next` if `allowed` accepts the current state. The transition
    /// is announced while the state cell is held, so subscribers see changes
    /// in the order they happened.
    fn transition(&self, allowed: impl FnOnce(ModelState) -> bool, next: ModelState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == next || !allowed(*state) {
                return false;
            }
            tracing::debug!(from = ?*state, to = ?next, "session state changed");
            *state = next;
            self.announce(next);
            true
        })
    }

    fn announce(&self, state: ModelState) {
        let transition = Transition {
            state,
            model_name: self.model_name(),
            messages: self.messages.borrow().clone(),
        };
        // no subscribers is fine
        let _ = self.transitions.send(transition);
    }

    async fn consume(
        &self,
        mut stream: ResponseStream,
        started: Instant,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamOutcome::Cancelled,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => self.append_chunk(&chunk, started),
                Some(Err(e)) => return StreamOutcome::Failed(e),
                None => return StreamOutcome::Completed,
            }
        }
    }

    fn append_chunk(&self, chunk: &str, started: Instant) {
        let mut first = false;
        self.messages.send_modify(|messages| match messages.last_mut() {
            Some(last) if last.role == Role::App => last.text.push_str(chunk),
            _ => {
                first = true;
                let mut message = Message::app(chunk);
                message.prefill = Some(started.elapsed());
                messages.push(message);
            }
        });

        if first {
            self.thinking.send_replace(false);
            tracing::debug!(prefill_ms = started.elapsed().as_millis() as u64, "first chunk");
        }
    }

    /// Release job `id` and return to `Ready`, unless a stopper already took
    /// the job over.
    fn finish_job(&self, id: u64) {
        let mut job = self.lock_job();
        if !job.as_ref().is_some_and(|j| j.id == id) {
            return;
        }
        *job = None;

        self.thinking.send_replace(false);
        self.transition(|s| s != ModelState::Stopping, ModelState::Ready);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

async fn generate(
    inner: Arc<Inner>,
    id: u64,
    prompt: String,
    cancel: CancellationToken,
    callbacks: QueryCallbacks,
) {
    let started = Instant::now();
    let stream = inner.engine.lock().await.response(&prompt);
    let outcome = inner.consume(stream, started, &cancel).await;

    let QueryCallbacks { on_error, on_finish } = callbacks;
    match outcome {
        StreamOutcome::Completed => {
            let speed = inner.engine.lock().await.generation_speed();
            inner.messages.send_modify(|messages| {
                if let Some(last) = messages.last_mut().filter(|m| m.role == Role::App) {
                    last.decode_speed = Some(speed);
                }
            });
            tracing::info!(job = id, decode_speed = speed, "answer complete");
            if let Some(on_finish) = on_finish {
                on_finish();
            }
        }
        StreamOutcome::Cancelled => {
            tracing::debug!(job = id, "generation cancelled");
        }
        StreamOutcome::Failed(e) => {
            tracing::warn!(job = id, error = %e, "generation failed");
            if let Some(on_error) = on_error {
                on_error(e.to_string());
            }
        }
    }

    inner.finish_job(id);
}
