//! Scripted collaborators
//!
//! In-process stand-ins for the image search and validator, keyed by query
//! and image link, that count how often they are called.

use async_trait::async_trait;
use flyer_resolver::services::{
    ImageCandidate, ImageSearch, ImageValidator, SearchError, ValidationError, ValidationVerdict,
};
use flyer_resolver::Collaborators;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Search returning fixed links per query; unknown queries find nothing
#[derive(Default)]
pub struct ScriptedSearch {
    results: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, query: &str, links: &[&str]) -> Self {
        self.results
            .insert(query.to_string(), links.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Sleep before answering, to keep a run busy
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSearch for ScriptedSearch {
    fn name(&self) -> &'static str {
        "scripted_search"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ImageCandidate>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .results
            .get(query)
            .map(|links| links.iter().take(limit).map(ImageCandidate::from_link).collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub enum Verdict {
    Valid(f64),
    Invalid,
    Error(&'static str),
}

/// Validator answering from a per-link script; unscripted links error
#[derive(Default)]
pub struct ScriptedValidator {
    script: HashMap<String, Verdict>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, link: &str, verdict: Verdict) -> Self {
        self.script.insert(link.to_string(), verdict);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageValidator for ScriptedValidator {
    fn name(&self) -> &'static str {
        "scripted_validator"
    }

    async fn validate(
        &self,
        image_url: &str,
        _product_name: &str,
        _description: Option<&str>,
    ) -> Result<ValidationVerdict, ValidationError> {
        self.seen.lock().unwrap().push(image_url.to_string());
        match self.script.get(image_url) {
            Some(Verdict::Valid(confidence)) => Ok(ValidationVerdict::new(true, *confidence, "matches")),
            Some(Verdict::Invalid) => Ok(ValidationVerdict::new(false, 0.0, "different product")),
            Some(Verdict::Error(message)) => Err(ValidationError::NetworkError(message.to_string())),
            None => Err(ValidationError::ImageFetch(format!("unscripted link {}", image_url))),
        }
    }
}

pub fn collaborators(search: Arc<ScriptedSearch>, validator: Arc<ScriptedValidator>) -> Collaborators {
    Collaborators { search, validator }
}
