#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use dnsdist_monitor::api::{
    ApiClientError, ApiResponse, DYNAMIC_RULES_PATH, DnsdistApi, FILTERING_RULES_PATH, STATISTICS_PATH,
};
use http::Method;
use serde_json::{Value, json};

/// Transport answering from per-path queues. The last queued answer of a path
/// keeps being served once the queue is drained; unknown paths get a 404.
#[derive(Default)]
pub struct ScriptedApi {
    routes: Mutex<HashMap<String, VecDeque<Result<ApiResponse, ApiClientError>>>>,
    calls: Mutex<Vec<(Method, String, Option<Value>)>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, response: Result<ApiResponse, ApiClientError>) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn json(&self, path: &str, value: Value) -> &Self {
        self.push(path, Ok(ApiResponse::json_body(200, &value)))
    }

    pub fn status(&self, path: &str, status: u16) -> &Self {
        self.push(path, Ok(ApiResponse::new(status, Vec::new())))
    }

    pub fn stats(&self, value: Value) -> &Self {
        self.json(STATISTICS_PATH, value)
    }

    pub fn filtering(&self, value: Value) -> &Self {
        self.json(FILTERING_RULES_PATH, value)
    }

    pub fn dynamic(&self, value: Value) -> &Self {
        self.json(DYNAMIC_RULES_PATH, value)
    }

    pub fn calls(&self) -> Vec<(Method, String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, p, _)| p == path).count()
    }
}

fn clone_answer(answer: &Result<ApiResponse, ApiClientError>) -> Result<ApiResponse, ApiClientError> {
    match answer {
        Ok(response) => Ok(response.clone()),
        Err(err) => Err(ApiClientError::Transport(err.to_string())),
    }
}

#[async_trait]
impl DnsdistApi for ScriptedApi {
    async fn request(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), path.to_string(), body.cloned()));

        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(path) else {
            return Ok(ApiResponse::new(404, Vec::new()));
        };
        if queue.len() > 1 {
            return queue.pop_front().unwrap_or_else(|| Ok(ApiResponse::new(404, Vec::new())));
        }
        match queue.front() {
            Some(answer) => clone_answer(answer),
            None => Ok(ApiResponse::new(404, Vec::new())),
        }
    }
}

/// Statistics list in the shape dnsdist serves.
pub fn stats(pairs: &[(&str, Value)]) -> Value {
    Value::Array(
        pairs
            .iter()
            .map(|(name, value)| json!({"name": name, "type": "StatisticItem", "value": value}))
            .collect(),
    )
}
