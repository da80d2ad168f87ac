//! Text rendering of pipeline events for the terminal log.

use fretscale_core::NoteEvent;
use fretscale_core::pipeline::PipelineEvent;
use fretscale_core::scales::{BestScaleResult, find_related_scales};

pub fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Note(note) => log::info!("{}", describe_note(note)),
        PipelineEvent::Scale(Some(best)) => log::info!("{}", describe_scale(best)),
        PipelineEvent::Scale(None) => log::debug!("Scale: not enough notes yet"),
        PipelineEvent::Silence => log::debug!("Silence"),
    }
}

pub fn describe_note(note: &NoteEvent) -> String {
    format!(
        "Note {:<4} {:>7.2} Hz  {:+5.1} cents  clarity {:.2}  @ {:.2}s",
        note.pitch.to_string(),
        note.frequency_hz,
        note.cents_deviation,
        note.confidence,
        note.timestamp.as_secs_f32()
    )
}

pub fn describe_scale(best: &BestScaleResult) -> String {
    let tones = best
        .scale_match
        .pitch_classes()
        .iter()
        .map(|pc| pc.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let related = find_related_scales(&best.scale_match)
        .iter()
        .map(|r| format!("{}: {} {}", r.label, r.root, r.scale.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Scale {} (support {}) [{}]  related: {}",
        best.scale_match, best.support_count, tones, related
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fretscale_core::scales::find_best_scale;
    use fretscale_core::tuning::{Pitch, PitchClass};
    use std::time::Duration;

    #[test]
    fn note_line_shows_pitch_and_deviation() {
        let note = NoteEvent {
            pitch: Pitch::new(PitchClass::A, 4),
            frequency_hz: 442.0,
            confidence: 0.93,
            cents_deviation: 7.85,
            timestamp: Duration::from_millis(1500),
        };
        let line = describe_note(&note);
        assert!(line.starts_with("Note A4"));
        assert!(line.contains("442.00 Hz"));
        assert!(line.contains("+7.8 cents") || line.contains("+7.9 cents"));
        assert!(line.contains("@ 1.50s"));
    }

    #[test]
    fn scale_line_lists_tones_and_relatives() {
        let best = find_best_scale(&[PitchClass::C, PitchClass::E, PitchClass::G]).unwrap();
        let line = describe_scale(&best);
        assert!(line.starts_with("Scale C Major (support 3)"));
        assert!(line.contains("[C D E F G A B]"));
        assert!(line.contains("Subdominant: F Major"));
        assert!(line.ends_with("Mediant: E Major"));
    }
}
