use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::report::{IncidentId, IncidentReport};

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/incidents/create-from-detection";
pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Destination for incident reports.
pub trait ReportSink {
    fn submit(&self, report: &IncidentReport) -> Result<IncidentId, SubmitError>;
}

impl<S: ReportSink + ?Sized> ReportSink for Box<S> {
    fn submit(&self, report: &IncidentReport) -> Result<IncidentId, SubmitError> {
        (**self).submit(report)
    }
}

impl<S: ReportSink + ?Sized> ReportSink for &S {
    fn submit(&self, report: &IncidentReport) -> Result<IncidentId, SubmitError> {
        (**self).submit(report)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIncidentResponse {
    incident_id: Option<serde_json::Value>,
    image_url: Option<String>,
}

/// POSTs reports as JSON to the incident endpoint.
pub struct HttpReportSink {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpReportSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            endpoint: endpoint.into(),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReportSink for HttpReportSink {
    fn submit(&self, report: &IncidentReport) -> Result<IncidentId, SubmitError> {
        let response = match self.agent.post(&self.endpoint).send_json(report) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let mut body = response.into_string().unwrap_or_default();
                truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
                return Err(SubmitError::Status { status, body });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(SubmitError::Transport(transport.to_string()));
            }
        };

        let parsed: CreateIncidentResponse = response
            .into_json()
            .map_err(|err| SubmitError::MalformedResponse(err.to_string()))?;
        if let Some(image_url) = parsed.image_url.as_deref() {
            log::debug!("incident image stored at {}", image_url);
        }
        match parsed.incident_id {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(IncidentId::new(id)),
            Some(serde_json::Value::Number(id)) => Ok(IncidentId::new(id.to_string())),
            _ => Err(SubmitError::MalformedResponse(
                "response has no incidentId".to_string(),
            )),
        }
    }
}

/// Deliver one report, logging the outcome. Never fails the caller.
pub fn submit_report<S: ReportSink + ?Sized>(sink: &S, report: &IncidentReport) -> Option<IncidentId> {
    match sink.submit(report) {
        Ok(id) => {
            log::info!(
                "incident {} created for camera {} ({} {:.2}, {})",
                id,
                report.camera_id,
                report.detection_type,
                report.confidence,
                report.severity.as_str()
            );
            Some(id)
        }
        Err(err) => {
            log::warn!(
                "failed to deliver {} report for camera {}: {}",
                report.detection_type,
                report.camera_id,
                err
            );
            None
        }
    }
}

fn truncate_on_char_boundary(value: &mut String, max: usize) {
    if value.len() <= max {
        return;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::policy::Severity;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn report() -> IncidentReport {
        IncidentReport {
            camera_id: "cam-1".to_string(),
            camera_name: "Kitchen".to_string(),
            location: "Building A".to_string(),
            detection_type: "fire".to_string(),
            confidence: 0.93,
            timestamp: "2024-03-01T12:00:00.000+00:00".to_string(),
            image: "aGVsbG8=".to_string(),
            snapshot_path: "snapshots/detection_cam-1_20240301_120000.jpg".to_string(),
            bbox: [1.0, 2.0, 3.0, 4.0],
            severity: Severity::High,
        }
    }

    /// Serves one request with `status` and `body`, handing the request
    /// body back through the join handle.
    fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("header");
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().expect("length");
                }
            }
            let mut request = vec![0u8; content_length];
            reader.read_exact(&mut request).expect("body");
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            )
            .expect("respond");
            String::from_utf8(request).expect("utf8")
        });
        (format!("http://{}/api/incidents/create-from-detection", addr), handle)
    }

    #[test]
    fn returns_incident_id_on_success() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"success":true,"incidentId":"inc-42","imageUrl":"/uploads/a.jpg"}"#,
        );
        let sink = HttpReportSink::new(url, Duration::from_secs(5));
        let id = sink.submit(&report()).expect("submitted");
        assert_eq!(id.as_str(), "inc-42");

        let body: serde_json::Value =
            serde_json::from_str(&server.join().expect("server")).expect("json");
        assert_eq!(body["cameraId"], "cam-1");
        assert_eq!(body["severity"], "high");
    }

    #[test]
    fn numeric_incident_id_is_accepted() {
        let (url, server) = serve_once("201 Created", r#"{"incidentId":7}"#);
        let sink = HttpReportSink::new(url, Duration::from_secs(5));
        assert_eq!(sink.submit(&report()).expect("submitted").as_str(), "7");
        server.join().expect("server");
    }

    #[test]
    fn non_success_status_is_reported() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"error":"db down"}"#);
        let sink = HttpReportSink::new(url, Duration::from_secs(5));
        match sink.submit(&report()) {
            Err(SubmitError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("db down"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        server.join().expect("server");
    }

    #[test]
    fn missing_incident_id_is_malformed() {
        let (url, server) = serve_once("200 OK", r#"{"success":true}"#);
        let sink = HttpReportSink::new(url, Duration::from_secs(5));
        assert!(matches!(
            sink.submit(&report()),
            Err(SubmitError::MalformedResponse(_))
        ));
        server.join().expect("server");
    }

    #[test]
    fn unreachable_endpoint_is_transport_error_and_logged_as_none() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let sink = HttpReportSink::new(format!("http://{}/", addr), Duration::from_secs(2));
        assert!(matches!(sink.submit(&report()), Err(SubmitError::Transport(_))));
        assert!(submit_report(&sink, &report()).is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut value = "ééé".to_string();
        truncate_on_char_boundary(&mut value, 3);
        assert_eq!(value, "é");
    }
}
