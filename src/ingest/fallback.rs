use anyhow::{anyhow, Result};

use super::{build_source, CaptureSettings, FrameSource, SourceSpec, SourceStats};
use crate::frame::Frame;

/// Common stream path variants to try when a network URL fails to open.
///
/// Phone and IP camera apps disagree on whether the stream lives at the root,
/// `/video` or `/stream`. The requested URL is always first; duplicates are
/// removed. Non-network sources have no alternatives.
pub fn alternative_urls(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if !raw.contains("://") || raw.starts_with("stub://") {
        return vec![raw.to_string()];
    }
    let base = raw.replace("/video", "");
    let base = base.trim_end_matches('/');
    let mut urls = vec![raw.to_string()];
    for candidate in [
        base.to_string(),
        format!("{}/video", base),
        format!("{}/stream", base),
    ] {
        if !urls.contains(&candidate) {
            urls.push(candidate);
        }
    }
    urls
}

/// Source that tries each candidate location in order when opened and then
/// behaves as the first one that connected.
pub struct FallbackSource {
    candidates: Vec<String>,
    settings: CaptureSettings,
    active: Option<(String, Box<dyn FrameSource>)>,
}

impl FallbackSource {
    pub fn new(raw: &str, settings: CaptureSettings) -> Self {
        Self {
            candidates: alternative_urls(raw),
            settings,
            active: None,
        }
    }

    /// The location that actually opened, if any.
    pub fn connected_to(&self) -> Option<&str> {
        self.active.as_ref().map(|(url, _)| url.as_str())
    }

    fn try_open(&self, candidate: &str) -> Result<Box<dyn FrameSource>> {
        let spec = SourceSpec::parse(candidate)?;
        let mut source = build_source(&spec, &self.settings)?;
        if let Err(err) = source.open() {
            source.release();
            return Err(err);
        }
        Ok(source)
    }
}

impl FrameSource for FallbackSource {
    fn open(&mut self) -> Result<()> {
        self.release();
        let mut errors = Vec::new();
        for (attempt, candidate) in self.candidates.iter().enumerate() {
            if attempt > 0 {
                log::info!("trying alternative stream location {}", candidate);
            }
            match self.try_open(candidate) {
                Ok(source) => {
                    if attempt > 0 {
                        log::info!("connected to alternative location {}", candidate);
                    }
                    self.active = Some((candidate.clone(), source));
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("could not open {}: {:#}", candidate, err);
                    errors.push(format!("{}: {:#}", candidate, err));
                }
            }
        }
        Err(anyhow!(
            "failed to open any stream location ({})",
            errors.join("; ")
        ))
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.active.as_mut() {
            Some((_, source)) => source.read_frame(),
            None => Err(anyhow!("no stream location is open")),
        }
    }

    fn release(&mut self) {
        if let Some((_, mut source)) = self.active.take() {
            source.release();
        }
    }

    fn is_healthy(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|(_, source)| source.is_healthy())
    }

    fn stats(&self) -> SourceStats {
        match self.active.as_ref() {
            Some((_, source)) => source.stats(),
            None => SourceStats {
                frames_captured: 0,
                source: self.candidates.first().cloned().unwrap_or_default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternatives_for_ip_camera_url() {
        assert_eq!(
            alternative_urls("http://192.168.1.100:8080/video"),
            vec![
                "http://192.168.1.100:8080/video",
                "http://192.168.1.100:8080",
                "http://192.168.1.100:8080/stream",
            ]
        );
    }

    #[test]
    fn local_sources_have_no_alternatives() {
        assert_eq!(alternative_urls("0"), vec!["0"]);
        assert_eq!(alternative_urls("stub://lobby"), vec!["stub://lobby"]);
    }

    #[test]
    fn opens_first_working_candidate() -> Result<()> {
        let mut source = FallbackSource::new("stub://lobby", CaptureSettings::default());
        source.open()?;
        assert_eq!(source.connected_to(), Some("stub://lobby"));
        assert!(source.read_frame()?.is_some());
        source.release();
        assert!(source.connected_to().is_none());
        Ok(())
    }

    #[test]
    fn reports_failure_when_nothing_opens() {
        let mut source = FallbackSource::new("stub://unavailable", CaptureSettings::default());
        assert!(source.open().is_err());
        assert!(source.read_frame().is_err());
    }
}
