//! Canonical field names of the asset-tree format
//!
//! Keys in asset files are not reliably cased; they are matched against this
//! list case-insensitively and replaced by the spelling used on the wire.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Known field names in their canonical spelling
pub const CANONICAL_KEYS: [&str; 127] = [
    "ActiveEffects",
    "BodyFlags",
    "Caps",
    "ClearedStatus",
    "Clip",
    "CurrAP",
    "CurrCell",
    "CurrHP",
    "CurrWeight",
    "CurrWorldspace",
    "CurrentHPGain",
    "Custom",
    "DateDay",
    "DateMonth",
    "DateYear",
    "Description",
    "Discovered",
    "Doors",
    "EffectColor",
    "Extents",
    "FavIconType",
    "HandleID",
    "HeadCondition",
    "HeadFlags",
    "Height",
    "HolotapePlaying",
    "InvComponents",
    "Inventory",
    "IsDataUnavailable",
    "IsInAnimation",
    "IsInAutoVanity",
    "IsInVats",
    "IsInVatsPlayback",
    "IsLoading",
    "IsMenuOpen",
    "IsPipboyNotEquipped",
    "IsPlayerDead",
    "IsPlayerInDialogue",
    "IsPlayerMovementLocked",
    "IsPlayerPipboyLocked",
    "LArmCondition",
    "LLegCondition",
    "ListVisible",
    "Local",
    "LocationFormId",
    "LocationMarkerFormId",
    "Locations",
    "Log",
    "Map",
    "MaxAP",
    "MaxHP",
    "MaxRank",
    "MaxWeight",
    "MinigameFormIds",
    "Modifier",
    "NEX",
    "NEY",
    "NWX",
    "NWY",
    "Name",
    "OnDoor",
    "PaperdollSection",
    "PerkPoints",
    "Perks",
    "Player",
    "PlayerInfo",
    "PlayerName",
    "PowerArmor",
    "QuestId",
    "Quests",
    "RArmCondition",
    "RLegCondition",
    "RadawayCount",
    "Radio",
    "Rank",
    "Rotation",
    "SWFFile",
    "SWX",
    "SWY",
    "Shared",
    "SlotResists",
    "SortMode",
    "Special",
    "StackID",
    "Stats",
    "Status",
    "StimpakCount",
    "TimeHour",
    "TorsoCondition",
    "TotalDamages",
    "TotalResists",
    "UnderwearType",
    "Value",
    "ValueType",
    "Version",
    "Visible",
    "Workshop",
    "WorkshopHappinessPct",
    "WorkshopOwned",
    "WorkshopPopulation",
    "World",
    "X",
    "XPLevel",
    "XPProgressPct",
    "Y",
    "canFavorite",
    "damageType",
    "diffRating",
    "equipState",
    "filterFlag",
    "formID",
    "inRange",
    "isLegendary",
    "isPowerArmorItem",
    "itemCardInfoList",
    "mapMarkerID",
    "radawayObjectID",
    "radawayObjectIDIsValid",
    "scaleWithDuration",
    "showAsPercent",
    "showIfZero",
    "sortedIDS",
    "statArray",
    "stimpakObjectID",
    "stimpakObjectIDIsValid",
    "taggedForSearch",
    "workshopData",
];

fn index() -> &'static HashMap<String, &'static str> {
    static INDEX: OnceLock<HashMap<String, &'static str>> = OnceLock::new();
    INDEX.get_or_init(|| {
        CANONICAL_KEYS
            .iter()
            .map(|key| (key.to_ascii_lowercase(), *key))
            .collect()
    })
}

/// Canonical spelling of `key`, or `key` itself if it is not a known field
pub fn canonical_key(key: &str) -> String {
    index()
        .get(&key.to_ascii_lowercase())
        .map_or_else(|| key.to_string(), |known| known.to_string())
}
