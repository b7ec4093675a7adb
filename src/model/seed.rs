//! Startup document the model is seeded with

use std::collections::BTreeMap;

use super::Value;
use crate::format::Literal;

const STATUS_FLAGS: [(&str, bool); 12] = [
    ("IsDataUnavailable", true),
    ("IsInAnimation", false),
    ("IsInAutoVanity", false),
    ("IsInVats", false),
    ("IsInVatsPlayback", false),
    ("IsLoading", false),
    ("IsMenuOpen", false),
    ("IsPipboyNotEquipped", true),
    ("IsPlayerDead", false),
    ("IsPlayerInDialogue", false),
    ("IsPlayerMovementLocked", false),
    ("IsPlayerPipboyLocked", false),
];

const EFFECT_COLOR: [f32; 3] = [0.08, 1.0, 0.09];

/// Player/world skeleton present before any peer has sent data
pub fn startup_document() -> Literal {
    let mut status = BTreeMap::new();
    status.insert(
        "EffectColor".to_string(),
        Literal::List(
            EFFECT_COLOR
                .iter()
                .map(|c| Literal::Scalar(Value::Float32(*c)))
                .collect(),
        ),
    );
    for (name, flag) in STATUS_FLAGS {
        status.insert(name.to_string(), Literal::Scalar(Value::Bool(flag)));
    }

    let empty_map = || Literal::Map(BTreeMap::new());
    let empty_list = || Literal::List(Vec::new());

    let mut root = BTreeMap::new();
    root.insert("Inventory".to_string(), empty_map());
    root.insert("Log".to_string(), empty_list());
    root.insert("Map".to_string(), empty_map());
    root.insert("Perks".to_string(), empty_list());
    root.insert("PlayerInfo".to_string(), empty_map());
    root.insert("Quests".to_string(), empty_list());
    root.insert("Radio".to_string(), empty_list());
    root.insert("Special".to_string(), empty_list());
    root.insert("Stats".to_string(), empty_map());
    root.insert("Status".to_string(), Literal::Map(status));
    root.insert("Workshop".to_string(), empty_list());
    Literal::Map(root)
}
