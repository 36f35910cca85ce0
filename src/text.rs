//! Turning chat messages into speakable utterances.

use crate::{
    constants::{DEFAULT_VOICE, MAX_MESSAGE_CHARS},
    ids::{ChannelId, UserId},
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref URL_RE: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+$").expect("valid regex");
    static ref USER_MENTION_RE: Regex = Regex::new(r"<@!?(\d+)>").expect("valid regex");
    static ref ROLE_MENTION_RE: Regex = Regex::new(r"<@&(\d+)>").expect("valid regex");
    static ref CHANNEL_MENTION_RE: Regex = Regex::new(r"<#(\d+)>").expect("valid regex");
    static ref CUSTOM_EMOJI_RE: Regex =
        Regex::new(r"<a?:([A-Za-z0-9_]+):(\d+)>").expect("valid regex");
}

/// Voice used for the "<nick> says" announcement.
const ANNOUNCER_VOICE: &str = DEFAULT_VOICE;

const LANGUAGE_VOICES: &[(&str, &str)] = &[
    ("en", "en-US-JennyNeural"),
    (
        "fil",
        "Microsoft Server Speech Text to Speech Voice (fil-PH, BlessicaNeural)",
    ),
    ("fr", "fr-FR-DeniseNeural"),
    ("de", "de-DE-KatjaNeural"),
    ("el", "el-GR-AthinaNeural"),
    ("hu", "hu-HU-NoemiNeural"),
    ("it", "it-IT-ElsaNeural"),
    ("jp", "ja-JP-NanamiNeural"),
    ("ko", "ko-KR-SunHiNeural"),
    ("pl", "pl-PL-AgnieszkaNeural"),
    ("pt", "pt-PT-FernandaNeural"),
    ("ro", "ro-RO-AlinaNeural"),
    ("ru", "ru-RU-DariyaNeural"),
    ("es", "es-CU-BelkysNeural"),
    ("sv", "sv-SE-SofieNeural"),
    ("ur", "ur-PK-UzmaNeural"),
    ("cy", "cy-GB-NiaNeural"),
    ("hr", "hr-HR-GabrijelaNeural"),
    ("da", "da-DK-ChristelNeural"),
    ("nl", "nl-NL-ColetteNeural"),
];

pub fn voice_for_language(lang: &str) -> Option<&'static str> {
    LANGUAGE_VOICES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(lang))
        .map(|(_, voice)| *voice)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SayMode {
    /// Chat line of a user who opted into continuous narration
    Narration,
    /// Explicit one-shot request, optionally in a specific voice or language
    Once {
        voice: Option<String>,
        lang: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct SayRequest {
    /// Channel the request was sent in
    pub channel: ChannelId,
    pub author: UserId,
    pub author_name: String,
    /// Message content with mentions already resolved
    pub content: String,
    pub mode: SayMode,
}

impl SayRequest {
    pub fn narration(
        channel: ChannelId,
        author: UserId,
        author_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            author,
            author_name: author_name.into(),
            content: content.into(),
            mode: SayMode::Narration,
        }
    }

    pub fn once(
        channel: ChannelId,
        author: UserId,
        author_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            author,
            author_name: author_name.into(),
            content: content.into(),
            mode: SayMode::Once {
                voice: None,
                lang: None,
            },
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        if let SayMode::Once { voice: v, .. } = &mut self.mode {
            *v = Some(voice.into());
        }
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        if let SayMode::Once { lang: l, .. } = &mut self.mode {
            *l = Some(lang.into());
        }
        self
    }
}

/// Result of offering a say request to a guild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SayOutcome {
    Queued,
    UnknownGuild,
    WrongChannel,
    NotSpeaker,
    NotListening,
    NotConnected,
    QueueFull,
}

impl SayOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SayOutcome::Queued)
    }
}

/// One queued unit of speech.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utterance {
    pub author_name: String,
    pub text: String,
    /// Per-utterance voice; the guild voice is used when `None`
    pub voice: Option<String>,
    /// Set for continuous narration, which is re-checked before playback
    pub narrator: Option<UserId>,
}

impl Utterance {
    pub fn from_request(request: &SayRequest) -> Self {
        let (voice, narrator) = match &request.mode {
            SayMode::Narration => (None, Some(request.author)),
            SayMode::Once { voice, lang } => {
                let lang_voice = lang
                    .as_deref()
                    .and_then(voice_for_language)
                    .map(str::to_string);
                (voice.clone().or(lang_voice), None)
            }
        };

        Self {
            author_name: request.author_name.clone(),
            text: clean_message(&request.content),
            voice,
            narrator,
        }
    }

    /// Render into markup for the speech engine.
    pub fn render(&self, fallback_voice: &str) -> Speech {
        let voice = self.voice.as_deref().unwrap_or(fallback_voice);
        let announcement = format!("{} says", self.author_name);

        let ssml = format!(
            r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="en-US"><voice name="{}">{}</voice><voice name="{}">{}</voice></speak>"#,
            escape_xml(ANNOUNCER_VOICE),
            escape_xml(&announcement),
            escape_xml(voice),
            escape_xml(&self.text),
        );

        Speech {
            ssml,
            text: format!("{announcement}. {}", self.text),
            voice: voice.to_string(),
        }
    }
}

/// Rendered utterance as handed to a speech engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Speech {
    pub ssml: String,
    /// Plain text for engines without SSML support
    pub text: String,
    pub voice: String,
}

/// Replace links with the word "link" and cut overly long messages.
pub fn clean_message(content: &str) -> String {
    let cleaned = content
        .split_whitespace()
        .map(|word| if URL_RE.is_match(word) { "link" } else { word })
        .collect::<Vec<_>>()
        .join(" ");

    match cleaned.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => cleaned[..cut].to_string(),
        None => cleaned,
    }
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Name lookups needed to make platform mentions speakable.
pub trait MentionLookup {
    fn member_name(&self, user: UserId) -> Option<String>;
    fn role_name(&self, role: u64) -> Option<String>;
    fn channel_name(&self, channel: ChannelId) -> Option<String>;
}

/// Rewrite user, role and channel mentions to names and custom emoji to
/// their short name. Unknown ids are left untouched.
pub fn resolve_mentions(content: &str, lookup: &dyn MentionLookup) -> String {
    fn id(caps: &Captures, group: usize) -> Option<u64> {
        caps.get(group)?.as_str().parse().ok()
    }

    let text = USER_MENTION_RE.replace_all(content, |caps: &Captures| {
        id(caps, 1)
            .and_then(|user| lookup.member_name(UserId(user)))
            .unwrap_or_else(|| caps[0].to_string())
    });
    let text = ROLE_MENTION_RE.replace_all(&text, |caps: &Captures| {
        id(caps, 1)
            .and_then(|role| lookup.role_name(role))
            .unwrap_or_else(|| caps[0].to_string())
    });
    let text = CHANNEL_MENTION_RE.replace_all(&text, |caps: &Captures| {
        id(caps, 1)
            .and_then(|channel| lookup.channel_name(ChannelId(channel)))
            .unwrap_or_else(|| caps[0].to_string())
    });
    let text = CUSTOM_EMOJI_RE.replace_all(&text, "$1");

    text.into_owned()
}
