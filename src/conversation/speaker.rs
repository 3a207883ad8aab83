//! Speaker resolution for transcript turns.

use crate::RawMessage;
use crate::persona::PersonaSet;
use std::collections::HashMap;

/// Maps a raw message to the speaker name shown in the transcript.
///
/// Posts made by the automation account under a persona's platform name
/// resolve to that persona's in-text name. Human senders go through the
/// static alias table and otherwise keep their raw id.
#[derive(Debug, Clone)]
pub struct UserResolver {
    automation_bot_id: String,
    persona_names: HashMap<String, String>,
    user_aliases: HashMap<String, String>,
}

impl UserResolver {
    pub fn new(
        automation_bot_id: impl Into<String>,
        personas: &PersonaSet,
        user_aliases: HashMap<String, String>,
    ) -> Self {
        let persona_names = personas
            .iter()
            .map(|persona| {
                (
                    persona.platform_display_name.clone(),
                    persona.display_name_in_text.clone(),
                )
            })
            .collect();

        Self {
            automation_bot_id: automation_bot_id.into(),
            persona_names,
            user_aliases,
        }
    }

    pub fn resolve(&self, message: &RawMessage) -> String {
        if message.bot_id.as_deref() == Some(self.automation_bot_id.as_str())
            && let Some(name) = message
                .bot_username
                .as_deref()
                .and_then(|username| self.persona_names.get(username))
        {
            return name.clone();
        }

        match message.sender_id.as_deref() {
            Some(sender) => self
                .user_aliases
                .get(sender)
                .cloned()
                .unwrap_or_else(|| sender.to_string()),
            // Bot posts carry no user id.
            None => message.bot_username.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{default_personas, default_themed_groups};

    fn resolver() -> UserResolver {
        let personas =
            PersonaSet::new(default_personas(), default_themed_groups()).expect("defaults are valid");
        let aliases = HashMap::from([("U1".to_string(), "博多市".to_string())]);
        UserResolver::new("BEHP604TV", &personas, aliases)
    }

    #[test]
    fn persona_posts_resolve_to_in_text_names() {
        let resolver = resolver();
        let message = RawMessage::from_bot("BEHP604TV", "今言うな", "やっほー");
        assert_eq!(resolver.resolve(&message), "ウナ");

        let message = RawMessage::from_bot("BEHP604TV", "りんな", "こんにちは");
        assert_eq!(resolver.resolve(&message), "りんな");
    }

    #[test]
    fn foreign_bots_do_not_impersonate_personas() {
        let resolver = resolver();
        let message = RawMessage::from_bot("BOTHER", "今言うな", "偽物");
        assert_eq!(resolver.resolve(&message), "今言うな");
    }

    #[test]
    fn users_resolve_through_alias_table() {
        let resolver = resolver();
        assert_eq!(resolver.resolve(&RawMessage::from_user("U1", "hi")), "博多市");
        assert_eq!(resolver.resolve(&RawMessage::from_user("U2", "hi")), "U2");

        let mut message = RawMessage::from_user("U1", "Hello");
        message.bot_id = Some("BOT".into());
        assert_eq!(resolver.resolve(&message), "博多市");
    }
}
