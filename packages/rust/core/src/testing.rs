//! In-crate fakes for the capability traits and a storage-backed harness.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::oneshot;

use leadflow_delivery::{DeliveryAck, MailTransport, OutgoingEmail};
use leadflow_discovery::{ContactSource, SearchQuery};
use leadflow_llm::{CompletionProvider, CompletionRequest, ResearchProvider};
use leadflow_shared::{
    GlobalConfig, Lead, Project, ProjectId, RawCandidate, Result, RuntimeSettings,
};
use leadflow_storage::Storage;

use crate::clock::FixedClock;
use crate::pipeline::{Capabilities, Pipeline};
use crate::resolver::EffectiveConfig;

/// Wednesday 2026-03-04 10:00 UTC, inside default working hours.
pub fn working_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
}

pub fn candidate(name: &str, email: Option<&str>, company: &str) -> RawCandidate {
    RawCandidate {
        name: name.into(),
        company: company.into(),
        email: email.map(String::from),
        ..Default::default()
    }
}

pub async fn temp_storage() -> Storage {
    let path = std::env::temp_dir().join(format!("lf_core_test_{}.db", uuid::Uuid::now_v7()));
    Storage::open(&path).await.unwrap()
}

/// Pops scripted responses in order, then falls back to a default.
struct Script<T> {
    queue: Mutex<VecDeque<Result<T>>>,
    fallback: Option<T>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Option<T>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
        }
    }

    fn push(&self, response: Result<T>) {
        self.queue.lock().unwrap().push_back(response);
    }

    fn next(&self, what: &'static str) -> Result<T> {
        if let Some(response) = self.queue.lock().unwrap().pop_front() {
            return response;
        }
        match &self.fallback {
            Some(value) => Ok(value.clone()),
            None => Err(leadflow_shared::LeadflowError::permanent(what, "no scripted response")),
        }
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

pub struct FakeContactSource {
    script: Script<Vec<RawCandidate>>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl FakeContactSource {
    pub fn new(responses: Vec<Result<Vec<RawCandidate>>>) -> Self {
        let fake = Self {
            script: Script::new(Some(Vec::new())),
            queries: Mutex::new(Vec::new()),
        };
        for r in responses {
            fake.push(r);
        }
        fake
    }

    pub fn push(&self, response: Result<Vec<RawCandidate>>) {
        self.script.push(response);
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContactSource for FakeContactSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawCandidate>> {
        self.queries.lock().unwrap().push(query.clone());
        self.script.next("discovery")
    }
}

/// Research text long enough to pass the quality gate.
pub const GOOD_RESEARCH: &str = "Analytical Engines is a mechanical computing company that \
     recently opened a new workshop in London and is hiring engineers for its difference engine line.";

pub struct FakeResearch {
    script: Script<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeResearch {
    pub fn new() -> Self {
        Self {
            script: Script::new(Some(GOOD_RESEARCH.to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: Result<String>) {
        self.script.push(response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResearchProvider for FakeResearch {
    async fn research(&self, subject: &str) -> Result<String> {
        self.calls.lock().unwrap().push(subject.to_string());
        self.script.next("research")
    }
}

pub struct FakeCompletion {
    script: Script<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self {
            script: Script::new(Some(
                "Subject: A quick idea for you\n\nHi there,\n\nShort and useful note.".to_string(),
            )),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: Result<String>) {
        self.script.push(response);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.script.next("generation")
    }
}

pub struct FakeMailer {
    script: Script<DeliveryAck>,
    sent: Mutex<Vec<OutgoingEmail>>,
    gate: Mutex<Option<SendGate>>,
}

struct SendGate {
    reached: oneshot::Sender<()>,
    resume: oneshot::Receiver<()>,
}

impl FakeMailer {
    pub fn new() -> Self {
        Self {
            script: Script::new(Some(DeliveryAck {
                code: "250".into(),
                message: "OK".into(),
            })),
            sent: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn push(&self, response: Result<DeliveryAck>) {
        self.script.push(response);
    }

    /// Park the next send until the returned sender fires. The receiver
    /// completes once the send has been reached.
    pub fn hold_next_send(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(SendGate {
            reached: reached_tx,
            resume: resume_rx,
        });
        (reached_rx, resume_tx)
    }

    /// Every message handed to the transport, accepted or not.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryAck> {
        self.sent.lock().unwrap().push(email.clone());
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.reached.send(());
            let _ = gate.resume.await;
        }
        self.script.next("delivery")
    }
}

#[derive(Clone)]
pub struct FakeCapabilities {
    pub contacts: Arc<FakeContactSource>,
    pub research: Arc<FakeResearch>,
    pub completion: Arc<FakeCompletion>,
    pub mail: Arc<FakeMailer>,
}

impl FakeCapabilities {
    pub fn new() -> Self {
        Self {
            contacts: Arc::new(FakeContactSource::new(Vec::new())),
            research: Arc::new(FakeResearch::new()),
            completion: Arc::new(FakeCompletion::new()),
            mail: Arc::new(FakeMailer::new()),
        }
    }
}

impl Capabilities for FakeCapabilities {
    fn contact_source(&self, config: &EffectiveConfig) -> Result<Arc<dyn ContactSource>> {
        config.credentials()?;
        Ok(self.contacts.clone())
    }

    fn research(&self, config: &EffectiveConfig) -> Result<Arc<dyn ResearchProvider>> {
        config.credentials()?;
        Ok(self.research.clone())
    }

    fn completion(&self, config: &EffectiveConfig) -> Result<Arc<dyn CompletionProvider>> {
        config.credentials()?;
        Ok(self.completion.clone())
    }

    fn mail(&self, config: &EffectiveConfig) -> Result<Arc<dyn MailTransport>> {
        config.smtp()?;
        Ok(self.mail.clone())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub pipeline: Pipeline,
    pub fakes: FakeCapabilities,
    pub clock: Arc<FixedClock>,
    pub project: Project,
}

impl Harness {
    /// Fresh database with `global` stored and one project created.
    pub async fn new(global: GlobalConfig) -> Self {
        Self::with_runtime(global, RuntimeSettings::default()).await
    }

    /// One worker at a time, so fakes see leads in selection order.
    pub async fn sequential(global: GlobalConfig) -> Self {
        let runtime = RuntimeSettings {
            worker_concurrency: 1,
            ..Default::default()
        };
        Self::with_runtime(global, runtime).await
    }

    pub async fn with_runtime(global: GlobalConfig, runtime: RuntimeSettings) -> Self {
        let storage = temp_storage().await;
        storage.put_global_config(&global).await.unwrap();

        let fakes = FakeCapabilities::new();
        let clock = Arc::new(FixedClock::new(working_time()));
        let pipeline = Pipeline::new(storage, Arc::new(fakes.clone()), runtime)
            .with_clock(clock.clone());

        let mut project = Project::new("Acme Outreach");
        project.brief = "Office coffee subscriptions for growing teams.".into();
        project.email_tone = "Warm and brief.".into();
        project.followup_strategy = "Mention a free trial week.".into();
        let project = pipeline.create_project(project).await.unwrap();

        Self {
            pipeline,
            fakes,
            clock,
            project,
        }
    }

    /// Insert a `new` lead directly.
    pub async fn lead(&self, email: &str, company: &str) -> Lead {
        self.lead_in(self.project.id, email, company).await
    }

    pub async fn lead_in(&self, project_id: ProjectId, email: &str, company: &str) -> Lead {
        let name = email
            .split('@')
            .next()
            .map(|local| format!("{local} Tester"))
            .unwrap_or_default();
        let mut lead = Lead::from_candidate(
            project_id,
            &candidate(&name, Some(email), company),
            email.to_string(),
        );
        lead.title = Some("Office Manager".into());
        assert!(self.pipeline.storage().insert_lead(&lead).await.unwrap());
        lead
    }

    pub async fn reload(&self, lead: &Lead) -> Lead {
        self.pipeline
            .storage()
            .get_lead(lead.id)
            .await
            .unwrap()
            .unwrap()
    }
}
