//! HTTP send trigger shared by the built-in adapters

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::AdapterError;
use crate::supervisor::ServerSubject;

/// POSTs JSON bodies to a fixed path on the server endpoint
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    client: reqwest::Client,
    path: String,
    authorization: Option<String>,
}

impl HttpTrigger {
    pub fn new(path: impl Into<String>) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            path: path.into(),
            authorization: None,
        })
    }

    /// Send an `Authorization` header with every request
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    pub fn url(&self, server: &ServerSubject) -> String {
        format!(
            "{}/{}",
            server.endpoint.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        server: &ServerSubject,
        body: &T,
    ) -> Result<(), AdapterError> {
        let url = self.url(server);
        debug!(url = %url, "Triggering send");

        let mut request = self.client.post(&url).json(body);
        if let Some(authorization) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::new(format!(
                "trigger {} returned {}: {}",
                url,
                status,
                text.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtbench_common::SubjectId;

    #[test]
    fn test_url_joins_path() {
        let trigger = HttpTrigger::new("/trigger").unwrap();
        let server = ServerSubject {
            id: SubjectId::server(),
            protocol: "sse".into(),
            project: "rtbench-sse".into(),
            container: "c".into(),
            readiness_marker: "listening".into(),
            endpoint: "http://127.0.0.1:8002/".into(),
        };
        assert_eq!(trigger.url(&server), "http://127.0.0.1:8002/trigger");
    }
}
