use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fetch::{self, Fetcher};

const NOTE_DELIMITER: char = 'n';
const QUAVER_LEFT: &str = "QL";
const QUAVER_RIGHT: &str = "QR";
const NOTE_RANGE: std::ops::RangeInclusive<u8> = 1..=8;

/// `current.json`: one url per bar plus the whole tune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MelodyManifest {
    pub melody_parts: Vec<String>,
    pub full_tune: String,
}

impl MelodyManifest {
    pub fn from_json(content: &[u8]) -> Result<Self, EngineError> {
        let manifest: MelodyManifest = serde_json::from_slice(content)
            .map_err(|e| EngineError::Manifest(e.to_string()))?;
        if manifest.melody_parts.is_empty() {
            return Err(EngineError::Manifest("no melody parts".to_string()));
        }
        Ok(manifest)
    }

    pub async fn fetch(fetcher: &dyn Fetcher, url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let bytes = fetch::with_timeout(url, timeout, fetcher.fetch(url)).await?;
        Self::from_json(&bytes)
    }

    /// Sound id for bar `index`, as used by the preloader.
    pub fn part_id(index: usize) -> String {
        format!("melody{}", index)
    }
}

/// One note of a bar. Quaver pairs share a beat: the left half carries
/// `is_quaver_left`, the right half `is_quaver_right`. Neither flag means a
/// crotchet filling the whole beat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub number: u8,
    pub is_quaver_left: bool,
    pub is_quaver_right: bool,
    pub full_note: String,
}

impl NoteEvent {
    pub fn is_crotchet(&self) -> bool {
        !self.is_quaver_left && !self.is_quaver_right
    }
}

pub type BarSequence = Vec<NoteEvent>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Melody {
    pub bars: Vec<BarSequence>,
}

impl Melody {
    pub fn bar(&self, index: usize) -> Option<&BarSequence> {
        self.bars.get(index)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Read the notes out of a bar file name such as `.../bar1n3n5QLn7QR.mp3`.
pub fn parse_bar_sequence(path: &str) -> Result<BarSequence, EngineError> {
    let filename = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    };

    // Everything before the first delimiter is the bar label
    let mut tokens = stem.split(NOTE_DELIMITER);
    tokens.next();

    let notes = tokens.map(|token| parse_token(path, token)).collect::<Result<BarSequence, _>>()?;
    if notes.is_empty() {
        return Err(EngineError::parse(path, "no note tokens"));
    }
    Ok(notes)
}

fn parse_token(path: &str, token: &str) -> Result<NoteEvent, EngineError> {
    let digits = token.replace(QUAVER_LEFT, "").replace(QUAVER_RIGHT, "");
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::parse(path, format!("malformed note token '{}'", token)));
    }

    let number: u8 = digits.parse()
        .map_err(|_| EngineError::parse(path, format!("note out of range in '{}'", token)))?;
    if !NOTE_RANGE.contains(&number) {
        return Err(EngineError::parse(path, format!("note {} out of range", number)));
    }

    Ok(NoteEvent {
        number,
        is_quaver_left: token.contains(QUAVER_LEFT),
        is_quaver_right: token.contains(QUAVER_RIGHT),
        full_note: token.to_string(),
    })
}

/// Parse every bar; the first bad file name aborts the whole melody.
pub fn parse_melody<S: AsRef<str>>(parts: &[S]) -> Result<Melody, EngineError> {
    let bars = parts.iter()
        .map(|p| parse_bar_sequence(p.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Melody { bars })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn note(number: u8, ql: bool, qr: bool, full: &str) -> NoteEvent {
        NoteEvent { number, is_quaver_left: ql, is_quaver_right: qr, full_note: full.to_string() }
    }

    #[test]
    fn parses_crotchets_and_quavers() {
        let bar = parse_bar_sequence("/assets/audio/dailyMelodies/bar1n3n5QLn7QR.mp3").unwrap();
        assert_eq!(bar, vec![
            note(3, false, false, "3"),
            note(5, true, false, "5QL"),
            note(7, false, true, "7QR"),
        ]);
        assert!(bar[0].is_crotchet());
    }

    #[test]
    fn bare_filename_and_other_extensions() {
        let bar = parse_bar_sequence("bar2n1n1n8.wav").unwrap();
        assert_eq!(bar.iter().map(|n| n.number).collect::<Vec<_>>(), vec![1, 1, 8]);
    }

    #[test]
    fn malformed_token_is_an_error_not_zero() {
        let err = parse_bar_sequence("/x/bar1n3nXQLn7.mp3").unwrap_err();
        assert!(matches!(err, EngineError::Parse { ref input, .. } if input == "/x/bar1n3nXQLn7.mp3"));
        assert!(parse_bar_sequence("/x/bar1n3nn7.mp3").is_err());
        assert!(parse_bar_sequence("/x/bar1nQL.mp3").is_err());
    }

    #[test]
    fn out_of_range_notes_are_rejected() {
        assert!(parse_bar_sequence("bar1n9.mp3").is_err());
        assert!(parse_bar_sequence("bar1n0.mp3").is_err());
        assert!(parse_bar_sequence("bar1n300.mp3").is_err());
    }

    #[test]
    fn file_without_notes_is_an_error() {
        assert!(parse_bar_sequence("/assets/bar1.mp3").is_err());
    }

    #[test]
    fn melody_aborts_on_first_bad_bar() {
        let ok = parse_melody(&["bar1n1n2.mp3", "bar2n3QLn4QRn5.mp3"]).unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.bar(1).unwrap().len(), 3);

        assert!(parse_melody(&["bar1n1.mp3", "bar2nZ.mp3", "bar3n2.mp3"]).is_err());
    }

    #[test]
    fn manifest_uses_camel_case() {
        let manifest = MelodyManifest::from_json(br#"{
            "melodyParts": ["/a/bar1n1.mp3", "/a/bar2n2.mp3"],
            "fullTune": "/a/tune.mp3"
        }"#).unwrap();
        assert_eq!(manifest.melody_parts.len(), 2);
        assert_eq!(manifest.full_tune, "/a/tune.mp3");
        assert_eq!(MelodyManifest::part_id(1), "melody1");
    }

    #[test]
    fn broken_manifest_is_recoverable_error() {
        assert!(matches!(MelodyManifest::from_json(b"<html>"), Err(EngineError::Manifest(_))));
        assert!(matches!(
            MelodyManifest::from_json(br#"{ "melodyParts": [], "fullTune": "/t.mp3" }"#),
            Err(EngineError::Manifest(_))
        ));
    }

    fn token_strategy() -> impl Strategy<Value = (u8, u8)> {
        (1u8..=8, 0u8..3)
    }

    proptest! {
        #[test]
        fn any_wellformed_name_parses_in_order(tokens in prop::collection::vec(token_strategy(), 1..8)) {
            let name: String = tokens.iter().map(|(n, kind)| match kind {
                0 => format!("n{}", n),
                1 => format!("n{}QL", n),
                _ => format!("n{}QR", n),
            }).collect();
            let bar = parse_bar_sequence(&format!("/m/bar1{}.mp3", name)).unwrap();

            prop_assert_eq!(bar.len(), tokens.len());
            for (event, (n, kind)) in bar.iter().zip(tokens.iter()) {
                prop_assert_eq!(event.number, *n);
                prop_assert_eq!(event.is_quaver_left, *kind == 1);
                prop_assert_eq!(event.is_quaver_right, *kind == 2);
            }
        }
    }
}
