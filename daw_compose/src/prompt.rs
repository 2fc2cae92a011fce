// src/prompt.rs

use serde::{Deserialize, Serialize};

use crate::error::ComposeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Full backing track.
    Beat,
    /// Short vocal sample.
    Sample,
}

/// What the user asked the generator for.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub genre: String,
    pub tempo: u32,
    pub requirements: Option<String>,
    pub vocal_style: Option<String>,
    pub lyrics: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Prompt {
    pub fn new(genre: impl Into<String>, tempo: u32) -> Self {
        Self { genre: genre.into(), tempo, ..Self::default() }
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = Some(requirements.into());
        self
    }

    pub fn with_vocals(mut self, style: impl Into<String>, lyrics: Option<String>) -> Self {
        self.vocal_style = Some(style.into());
        self.lyrics = lyrics;
        self
    }

    fn check_required(&self) -> Result<&str, ComposeError> {
        let genre = self.genre.trim();
        if genre.is_empty() || self.tempo == 0 {
            return Err(ComposeError::InvalidPrompt("genre and tempo are required".into()));
        }
        Ok(genre)
    }

    /// `"30 seconds {genre} track at {tempo} BPM[ with {requirements}]"`
    pub fn beat_text(&self) -> Result<String, ComposeError> {
        let genre = self.check_required()?;
        let mut text = format!("30 seconds {genre} track at {} BPM", self.tempo);
        if let Some(requirements) = present(&self.requirements) {
            text.push_str(&format!(" with {requirements}"));
        }
        Ok(text)
    }

    pub fn sample_text(&self) -> Result<String, ComposeError> {
        let genre = self.check_required()?;
        let Some(style) = present(&self.vocal_style) else {
            return Err(ComposeError::InvalidPrompt("genre, tempo and vocal style are required".into()));
        };
        let mut text = format!("{genre} {style} at {} BPM", self.tempo);
        if let Some(lyrics) = present(&self.lyrics) {
            text.push_str(&format!(" with lyrics about {lyrics}"));
        }
        if let Some(requirements) = present(&self.requirements) {
            text.push_str(&format!(". Additional requirements: {requirements}"));
        }
        Ok(text)
    }

    pub fn text_for(&self, kind: PromptKind) -> Result<String, ComposeError> {
        match kind {
            PromptKind::Beat => self.beat_text(),
            PromptKind::Sample => self.sample_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beat_text() {
        assert_eq!(Prompt::new("lofi", 90).beat_text().unwrap(), "30 seconds lofi track at 90 BPM");
        assert_eq!(
            Prompt::new("house", 124).with_requirements("a rolling bassline").beat_text().unwrap(),
            "30 seconds house track at 124 BPM with a rolling bassline"
        );
    }

    #[test]
    fn blank_requirements_are_ignored() {
        let prompt = Prompt::new("lofi", 90).with_requirements("   ");
        assert_eq!(prompt.beat_text().unwrap(), "30 seconds lofi track at 90 BPM");
    }

    #[test]
    fn sample_text_appends_lyrics_then_requirements() {
        let prompt = Prompt::new("soul", 80)
            .with_vocals("female vocals", Some("summer rain".into()))
            .with_requirements("no reverb");
        assert_eq!(
            prompt.sample_text().unwrap(),
            "soul female vocals at 80 BPM with lyrics about summer rain. Additional requirements: no reverb"
        );
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(matches!(Prompt::new("", 90).beat_text(), Err(ComposeError::InvalidPrompt(_))));
        assert!(matches!(Prompt::new("lofi", 0).beat_text(), Err(ComposeError::InvalidPrompt(_))));
        assert!(matches!(Prompt::new("lofi", 90).sample_text(), Err(ComposeError::InvalidPrompt(_))));
    }

    #[test]
    fn deserializes_from_camel_case() {
        let prompt: Prompt =
            serde_json::from_str(r#"{"genre":"trap","tempo":140,"vocalStyle":"choir","lyrics":null}"#).unwrap();
        assert_eq!(prompt.vocal_style.as_deref(), Some("choir"));
        assert_eq!(prompt.text_for(PromptKind::Sample).unwrap(), "trap choir at 140 BPM");
    }
}
