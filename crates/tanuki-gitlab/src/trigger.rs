use regex::Regex;
use tanuki_provider::ProviderId;
use tanuki_session::SpecStage;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Provider mention found in an issue description or note body.
pub struct Trigger {
    pub provider: ProviderId,
    /// Text after the mention, or the body without the mention when nothing
    /// follows it. Excludes any spec-kit slash command.
    pub command: String,
    pub spec_stage: Option<SpecStage>,
}

#[derive(Debug, Clone)]
/// Matches `@<mention>` trigger phrases, one mention per provider.
pub struct TriggerMatcher {
    patterns: Vec<(ProviderId, Regex)>,
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new(ProviderId::ALL.iter().map(|provider| (*provider, provider.as_str())))
            .unwrap_or(Self {
                patterns: Vec::new(),
            })
    }
}

impl TriggerMatcher {
    pub fn new<'a>(
        mentions: impl IntoIterator<Item = (ProviderId, &'a str)>,
    ) -> Result<Self, regex::Error> {
        let mut patterns = Vec::new();
        for (provider, mention) in mentions {
            let mention = mention.trim().trim_start_matches('@');
            if mention.is_empty() {
                continue;
            }
            let pattern = Regex::new(&format!(
                r"(?i)(?:^|[^\w@])@{}(?:$|[^\w-])",
                regex::escape(mention)
            ))?;
            patterns.push((provider, pattern));
        }
        Ok(Self { patterns })
    }

    /// Earliest provider mention in `body`, if any.
    pub fn parse(&self, body: &str) -> Option<Trigger> {
        let (provider, start, end) = self
            .patterns
            .iter()
            .filter_map(|(provider, pattern)| {
                pattern
                    .find(body)
                    .map(|found| (*provider, mention_bounds(body, found.start(), found.end())))
            })
            .min_by_key(|(_, (start, _))| *start)
            .map(|(provider, (start, end))| (provider, start, end))?;

        let after = body[end..].trim();
        let command = if after.is_empty() {
            body[..start].trim().to_string()
        } else {
            after.to_string()
        };
        let (spec_stage, command) = split_spec_command(&command);
        Some(Trigger {
            provider,
            command,
            spec_stage,
        })
    }
}

/// Narrows a regex match to the `@mention` itself, dropping the surrounding
/// boundary characters the pattern consumed.
fn mention_bounds(body: &str, start: usize, end: usize) -> (usize, usize) {
    let matched = &body[start..end];
    let at = matched.find('@').map_or(start, |offset| start + offset);
    let tail = body[at + 1..end]
        .char_indices()
        .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_' || *ch == '-'))
        .map_or(end, |(offset, _)| at + 1 + offset);
    (at, tail)
}

fn split_spec_command(command: &str) -> (Option<SpecStage>, String) {
    if !command.starts_with('/') {
        return (None, command.to_string());
    }
    let (head, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));
    match head.parse::<SpecStage>() {
        Ok(stage) => (Some(stage), rest.trim().to_string()),
        Err(_) => (None, command.to_string()),
    }
}
