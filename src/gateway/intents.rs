/// Intent names and their bit in the Identify `intents` field.
pub const ALL_INTENTS: &[(&str, u64)] = &[
    ("guilds", 1 << 0),
    ("guild_members", 1 << 1), // privileged
    ("guild_moderation", 1 << 2),
    ("guild_expressions", 1 << 3),
    ("guild_integrations", 1 << 4),
    ("guild_webhooks", 1 << 5),
    ("guild_invites", 1 << 6),
    ("guild_voice_states", 1 << 7),
    ("guild_presences", 1 << 8), // privileged
    ("guild_messages", 1 << 9),
    ("guild_message_reactions", 1 << 10),
    ("guild_message_typing", 1 << 11),
    ("direct_messages", 1 << 12),
    ("direct_message_reactions", 1 << 13),
    ("direct_message_typing", 1 << 14),
    ("message_content", 1 << 15), // privileged
    ("guild_scheduled_events", 1 << 16),
];

pub const PRIVILEGED_INTENTS: &[&str] = &["guild_members", "guild_presences", "message_content"];

/// Bit for a single intent name.
pub fn intent_bit(name: &str) -> Option<u64> {
    ALL_INTENTS
        .iter()
        .find(|(intent, _)| *intent == name)
        .map(|(_, bit)| *bit)
}

/// Every intent that does not need to be enabled on the application page.
pub fn non_privileged() -> u64 {
    ALL_INTENTS
        .iter()
        .filter(|(name, _)| !PRIVILEGED_INTENTS.contains(name))
        .fold(0, |acc, (_, bit)| acc | bit)
}

/// Parse a comma-separated list of intent names (or a raw integer) into a
/// bitfield. Unknown names are logged and skipped.
pub fn parse_intents(input: &str) -> u64 {
    let input = input.trim();
    if let Ok(bits) = input.parse::<u64>() {
        return bits;
    }
    input.split(',')
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .fold(0, |acc, name| match intent_bit(&name) {
            Some(bit) => acc | bit,
            None => {
                tracing::warn!("ignoring unknown intent '{}'", name);
                acc
            }
        })
}

/// Whether the bitfield asks for any privileged intent.
pub fn has_privileged(intents: u64) -> bool {
    PRIVILEGED_INTENTS
        .iter()
        .filter_map(|name| intent_bit(name))
        .any(|bit| intents & bit != 0)
}
