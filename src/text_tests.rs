//! Unit tests for the text module

#[cfg(test)]
mod tests {
    use crate::ids::{ChannelId, UserId};
    use crate::text::{
        clean_message, escape_xml, resolve_mentions, voice_for_language, MentionLookup, SayRequest,
        Utterance,
    };

    struct Names;

    impl MentionLookup for Names {
        fn member_name(&self, user: UserId) -> Option<String> {
            (user == UserId(1)).then(|| "Alice".to_string())
        }

        fn role_name(&self, role: u64) -> Option<String> {
            (role == 2).then(|| "Mods".to_string())
        }

        fn channel_name(&self, channel: ChannelId) -> Option<String> {
            (channel == ChannelId(3)).then(|| "general".to_string())
        }
    }

    fn request(content: &str) -> SayRequest {
        SayRequest::once(ChannelId(10), UserId(20), "Bob", content)
    }

    #[test]
    fn test_links_are_replaced() {
        assert_eq!(
            clean_message("look at https://example.com/cat.png please"),
            "look at link please"
        );
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let long = "ä".repeat(300);
        assert_eq!(clean_message(&long).chars().count(), 210);
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(
            escape_xml(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &apos;Jerry&apos;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_language_table() {
        assert_eq!(voice_for_language("de"), Some("de-DE-KatjaNeural"));
        assert_eq!(voice_for_language("FR"), Some("fr-FR-DeniseNeural"));
        assert_eq!(voice_for_language("xx"), None);
    }

    #[test]
    fn test_mentions_are_resolved() {
        let text = resolve_mentions("<@1> <@!1> <@&2> in <#3> <:pog:123> <a:dance:456>", &Names);
        assert_eq!(text, "Alice Alice Mods in general pog dance");
    }

    #[test]
    fn test_unknown_mentions_are_left_alone() {
        let text = resolve_mentions("hi <@99> and <#98>", &Names);
        assert_eq!(text, "hi <@99> and <#98>");
    }

    #[test]
    fn test_render_uses_guild_voice_by_default() {
        let speech = Utterance::from_request(&request("hello")).render("en-GB-SoniaNeural");

        assert_eq!(speech.voice, "en-GB-SoniaNeural");
        assert!(speech
            .ssml
            .contains(r#"<voice name="en-US-JennyNeural">Bob says</voice>"#));
        assert!(speech
            .ssml
            .contains(r#"<voice name="en-GB-SoniaNeural">hello</voice>"#));
        assert_eq!(speech.text, "Bob says. hello");
    }

    #[test]
    fn test_voice_override_wins() {
        let utterance = Utterance::from_request(&request("hi").with_voice("it-IT-ElsaNeural"));
        assert_eq!(utterance.render("en-US-JennyNeural").voice, "it-IT-ElsaNeural");
    }

    #[test]
    fn test_language_selects_voice() {
        let utterance = Utterance::from_request(&request("hej").with_lang("sv"));
        assert_eq!(utterance.voice.as_deref(), Some("sv-SE-SofieNeural"));
    }

    #[test]
    fn test_narration_remembers_narrator() {
        let request = SayRequest::narration(ChannelId(10), UserId(20), "Bob", "hi");
        let utterance = Utterance::from_request(&request);

        assert_eq!(utterance.narrator, Some(UserId(20)));
        assert_eq!(utterance.voice, None);
    }

    #[test]
    fn test_message_markup_is_escaped() {
        let speech = Utterance::from_request(&request("1 < 2 & 3")).render("en-US-JennyNeural");
        assert!(speech.ssml.contains("1 &lt; 2 &amp; 3"));
    }
}
