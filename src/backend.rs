//! REST collaborators: exercise catalogue, session persistence and personalization.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::Thresholds;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub target_reps: u32,
    pub duration_seconds: u32,
}

impl ExerciseInfo {
    fn new(id: &str, name: &str, description: &str, target_reps: u32, duration_seconds: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            target_reps,
            duration_seconds,
        }
    }
}

/// Catalogue used when the server cannot be reached.
pub fn builtin_exercises() -> Vec<ExerciseInfo> {
    vec![
        ExerciseInfo::new("squat", "Squat (Gập gối)", "Bài tập tăng cường cơ chân", 10, 180),
        ExerciseInfo::new("arm_raise", "Nâng Tay", "Bài tập vai và tay", 15, 120),
        ExerciseInfo::new(
            "single_leg_stand",
            "Đứng 1 Chân",
            "Bài tập cân bằng và cơ chân",
            5,
            300,
        ),
        ExerciseInfo::new("calf_raise", "Nâng Gót Chân", "Bài tập tăng cường cơ bắp chân", 15, 150),
    ]
}

#[derive(Debug, Deserialize)]
struct ExerciseList {
    exercises: Vec<ExerciseInfo>,
}

#[derive(Debug, Deserialize)]
struct StartedSession {
    session_id: SessionId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalizedParams {
    #[serde(default)]
    pub down_angle: Option<f64>,
    #[serde(default)]
    pub up_angle: Option<f64>,
    #[serde(default)]
    pub max_reps: Option<u32>,
    #[serde(default)]
    pub rest_seconds: Option<u32>,
    /// 0.0 (easy) ..= 1.0 (hard)
    #[serde(default)]
    pub difficulty_score: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl PersonalizedParams {
    pub fn thresholds(&self) -> Option<Thresholds> {
        let t = Thresholds {
            down_angle: self.down_angle,
            up_angle: self.up_angle,
            max_reps: self.max_reps,
        };
        (!t.is_empty()).then_some(t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTally {
    pub count: u32,
    #[serde(default)]
    pub severity: String,
}

/// Server-side summary returned when a session is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub total_reps: u32,
    pub correct_reps: u32,
    /// Percent, 0..=100
    pub accuracy: f64,
    pub duration_seconds: f64,
    #[serde(default)]
    pub common_errors: BTreeMap<String, ErrorTally>,
}

#[async_trait]
pub trait ExerciseCatalog: Send + Sync {
    async fn exercises(&self) -> Result<Vec<ExerciseInfo>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn start_session(&self, exercise: &str) -> Result<SessionId>;
    async fn end_session(&self, id: SessionId) -> Result<SessionSummary>;
}

#[async_trait]
pub trait ProfileService: Send + Sync {
    /// `Ok(None)` when the user has no profile for this exercise.
    async fn personalized_params(&self, exercise: &str) -> Result<Option<PersonalizedParams>>;
}

/// Personalization is best-effort; failures mean "not personalized".
pub async fn fetch_personalization(
    service: &dyn ProfileService,
    exercise: &str,
) -> Option<PersonalizedParams> {
    match service.personalized_params(exercise).await {
        Ok(Some(params)) => {
            info!(exercise, ?params, "personalized parameters loaded");
            Some(params)
        }
        Ok(None) => {
            debug!(exercise, "no personalized parameters");
            None
        }
        Err(e) => {
            warn!(exercise, error = %e, "personalization unavailable, using exercise defaults");
            None
        }
    }
}

/// Personalized max reps, else the exercise default, else `fallback`.
pub fn effective_target(
    params: Option<&PersonalizedParams>,
    exercise: Option<&ExerciseInfo>,
    fallback: u32,
) -> u32 {
    params
        .and_then(|p| p.max_reps)
        .or_else(|| exercise.map(|e| e.target_reps))
        .filter(|t| *t > 0)
        .unwrap_or(fallback)
}

/// `reqwest` client for the rehabilitation server's REST API.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Every request, body included, must finish within `timeout`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let token = token.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: (!token.is_empty()).then_some(token),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ExerciseCatalog for HttpBackend {
    async fn exercises(&self) -> Result<Vec<ExerciseInfo>> {
        let list: ExerciseList = self
            .authorized(self.client.get(self.url("/exercises")))
            .send()
            .await
            .context("exercise catalogue request failed")?
            .error_for_status()?
            .json()
            .await
            .context("invalid exercise catalogue")?;
        Ok(list.exercises)
    }
}

#[async_trait]
impl SessionStore for HttpBackend {
    async fn start_session(&self, exercise: &str) -> Result<SessionId> {
        let started: StartedSession = self
            .authorized(self.client.post(self.url("/sessions/start")))
            .query(&[("exercise_name", exercise)])
            .send()
            .await
            .context("session start request failed")?
            .error_for_status()?
            .json()
            .await
            .context("invalid session start response")?;
        Ok(started.session_id)
    }

    async fn end_session(&self, id: SessionId) -> Result<SessionSummary> {
        let summary = self
            .authorized(self.client.post(self.url(&format!("/sessions/{id}/end"))))
            .send()
            .await
            .context("session end request failed")?
            .error_for_status()?
            .json()
            .await
            .context("invalid session summary")?;
        Ok(summary)
    }
}

#[async_trait]
impl ProfileService for HttpBackend {
    async fn personalized_params(&self, exercise: &str) -> Result<Option<PersonalizedParams>> {
        let resp = self
            .authorized(self.client.post(self.url("/personalized-params")))
            .json(&serde_json::json!({ "exercise_type": exercise }))
            .send()
            .await
            .context("personalization request failed")?;
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "personalization not available");
            return Ok(None);
        }
        let params = resp
            .json()
            .await
            .context("invalid personalization response")?;
        Ok(Some(params))
    }
}
