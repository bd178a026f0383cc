//! Protocols shipped with the binary.

use crate::types::{Goal, Protocol};
use once_cell::sync::Lazy;

fn protocol(id: &str, name: &str, goals: &[Goal], base_duration_secs: u32, cues: &[&str]) -> Protocol {
    Protocol {
        id: id.to_string(),
        name: name.to_string(),
        goals: goals.to_vec(),
        base_duration_secs,
        cues: cues.iter().map(|c| c.to_string()).collect(),
    }
}

/// Built-in catalog, in display order.
pub static BUILTIN_PROTOCOLS: Lazy<Vec<Protocol>> = Lazy::new(|| {
    vec![
        protocol(
            "box-breathing",
            "Box Breathing",
            &[Goal::Focus, Goal::Calm],
            120,
            &["Inhale 4", "Hold 4", "Exhale 4", "Hold 4"],
        ),
        protocol(
            "4-7-8",
            "4-7-8 Breathing",
            &[Goal::Calm],
            120,
            &["Inhale through the nose 4", "Hold 7", "Exhale through the mouth 8"],
        ),
        protocol(
            "coherent-breathing",
            "Coherent Breathing",
            &[Goal::Calm, Goal::Focus],
            180,
            &["Inhale 5.5", "Exhale 5.5"],
        ),
        protocol(
            "physiological-sigh",
            "Physiological Sigh",
            &[Goal::Calm],
            60,
            &["Double inhale through the nose", "Long exhale through the mouth"],
        ),
        protocol(
            "breath-of-fire",
            "Breath of Fire",
            &[Goal::Energy],
            60,
            &["Passive inhale", "Sharp exhale from the belly", "Keep a steady rhythm"],
        ),
        protocol(
            "power-breathing",
            "Power Breathing",
            &[Goal::Energy, Goal::Focus],
            150,
            &["30 deep breaths", "Exhale and hold", "Recovery breath, hold 15"],
        ),
        protocol(
            "alternate-nostril",
            "Alternate Nostril Breathing",
            &[Goal::Focus, Goal::Calm],
            150,
            &["Close right, inhale left", "Close left, exhale right", "Switch sides"],
        ),
        protocol(
            "humming-bee",
            "Humming Bee Breath",
            &[Goal::Calm],
            90,
            &["Inhale deeply", "Hum on the exhale", "Feel the vibration"],
        ),
    ]
});
