/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::Serialize;
use slog::{info, warn, Logger};

use super::common::sleep;

/**
 * A small client for the parts of the Harbor v2.0 REST API that we need to
 * prepare a fresh registry.
 */
pub struct Registry {
    client: Client,
    url: String,
    username: String,
    password: String,
    settle_secs: u64,
    attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Created,
    Exists,
    Deleted,
    Missing,
}

/*
 * Harbor sits behind nginx, which answers with 502 until the core service
 * is up.  Those, and connection failures, are worth trying again.
 */
enum Attempt<T> {
    Done(T),
    Retry(String),
}

#[derive(Serialize)]
struct ProjectReq<'a> {
    project_name: &'a str,
    public: bool,
}

impl Registry {
    pub fn new(
        url: &str,
        username: &str,
        password: &str,
        settle_secs: u64,
        attempts: u32,
    ) -> Result<Registry> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Registry {
            client,
            url: url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            settle_secs,
            attempts: attempts.max(1),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v2.0/{}", self.url, path)
    }

    fn auth(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.basic_auth(&self.username, Some(&self.password))
            .header("accept", "application/json")
    }

    fn send<T, F>(&self, rb: RequestBuilder, decide: F) -> Result<Attempt<T>>
        where F: FnOnce(StatusCode) -> Option<T>
    {
        let res = match rb.send() {
            Ok(res) => res,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return Ok(Attempt::Retry(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let status = res.status();
        if let Some(o) = decide(status) {
            return Ok(Attempt::Done(o));
        }

        if status.is_server_error() {
            return Ok(Attempt::Retry(format!("status {}", status)));
        }

        let body = res.text().unwrap_or_default();
        bail!("unexpected status {}: {}", status, body.trim());
    }

    fn retry<T, F>(&self, log: &Logger, what: &str, mut f: F) -> Result<T>
        where F: FnMut() -> Result<Attempt<T>>
    {
        for n in 1..=self.attempts {
            match f()? {
                Attempt::Done(o) => return Ok(o),
                Attempt::Retry(why) => {
                    warn!(log, "{}: attempt {}/{}: {}", what, n,
                        self.attempts, why);
                    if n < self.attempts {
                        sleep(self.settle_secs);
                    }
                }
            }
        }

        bail!("{}: registry at {} did not respond after {} attempts",
            what, self.url, self.attempts);
    }

    /**
     * Wait until the registry core answers its health check.
     */
    pub fn wait_ready(&self, log: &Logger) -> Result<()> {
        info!(log, "waiting for registry at {} ...", self.url);
        self.retry(log, "ping", || {
            let rb = self.client.get(self.api("ping"));
            self.send(rb, |s| if s.is_success() { Some(()) } else { None })
        })?;
        info!(log, "registry is up");
        Ok(())
    }

    pub fn create_project(
        &self,
        log: &Logger,
        name: &str,
        public: bool,
    ) -> Result<Outcome> {
        let o = self.retry(log, &format!("create project {}", name), || {
            let rb = self.auth(self.client.post(self.api("projects")))
                .header("X-Resource-Name-In-Location", "false")
                .json(&ProjectReq { project_name: name, public });
            self.send(rb, |s| match s {
                StatusCode::CREATED => Some(Outcome::Created),
                StatusCode::CONFLICT => Some(Outcome::Exists),
                _ => None,
            })
        })?;

        match o {
            Outcome::Created => info!(log, "project {} created", name),
            _ => info!(log, "project {} exists already", name),
        }
        Ok(o)
    }

    pub fn delete_project(&self, log: &Logger, name: &str) -> Result<Outcome> {
        let o = self.retry(log, &format!("delete project {}", name), || {
            let rb = self.auth(self.client.delete(
                self.api(&format!("projects/{}", name))))
                .header("X-Is-Resource-Name", "true");
            self.send(rb, |s| match s {
                StatusCode::OK => Some(Outcome::Deleted),
                StatusCode::NOT_FOUND => Some(Outcome::Missing),
                _ => None,
            })
        })?;

        match o {
            Outcome::Deleted => info!(log, "project {} deleted", name),
            _ => info!(log, "project {} does not exist", name),
        }
        Ok(o)
    }
}
