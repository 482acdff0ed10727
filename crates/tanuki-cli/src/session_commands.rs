use std::time::Duration;

use anyhow::{bail, Context, Result};
use tanuki_runtime::ProcessorConfig;
use tanuki_session::{FileSessionStorage, Session, SessionKey, SessionManager};

use crate::cli_args::SessionsCommand;

pub(crate) fn open_session_manager(config: &ProcessorConfig) -> Result<SessionManager> {
    let storage = FileSessionStorage::new(&config.session_store_path);
    SessionManager::new(config.session_manager_config(), Box::new(storage)).with_context(|| {
        format!(
            "failed to open session store {}",
            config.session_store_path.display()
        )
    })
}

fn render_session_line(session: &Session) -> String {
    let providers = session
        .provider_sessions
        .keys()
        .map(|provider| provider.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let mut line = format!(
        "{} last_provider={} providers={} last_used={}",
        session.issue_key,
        session.last_provider,
        providers,
        session.last_used.to_rfc3339()
    );
    if let Some(branch) = session.branch_name.as_deref() {
        line.push_str(&format!(" branch={branch}"));
    }
    if let Some(iid) = session.merge_request_iid {
        line.push_str(&format!(" mr=!{iid}"));
    }
    line
}

pub(crate) fn run_sessions_command(
    manager: &SessionManager,
    command: &SessionsCommand,
) -> Result<String> {
    match command {
        SessionsCommand::Stats => {
            let stats = manager.get_stats();
            Ok(serde_json::to_string_pretty(&stats)?)
        }
        SessionsCommand::List => {
            let sessions = manager.list();
            if sessions.is_empty() {
                return Ok("no sessions".to_string());
            }
            Ok(sessions
                .iter()
                .map(render_session_line)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        SessionsCommand::Show { key } => {
            let Some(session) = manager.peek(&SessionKey::from_raw(key.trim())) else {
                bail!("no live session for '{key}'");
            };
            Ok(serde_json::to_string_pretty(&session)?)
        }
        SessionsCommand::Clean { max_idle_secs } => {
            let report = manager.clean_expired_sessions(max_idle_secs.map(Duration::from_secs))?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        SessionsCommand::Remove { key, provider } => {
            let removed = manager.remove_session(&SessionKey::from_raw(key.trim()), *provider)?;
            Ok(match (removed, provider) {
                (true, Some(provider)) => format!("removed {provider} conversation from {key}"),
                (true, None) => format!("removed session {key}"),
                (false, _) => format!("nothing to remove for {key}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use tanuki_provider::ProviderId;
    use tanuki_runtime::ProcessorConfig;
    use tanuki_session::{SessionKey, SessionMeta};
    use tempfile::tempdir;

    use super::{open_session_manager, run_sessions_command};
    use crate::cli_args::SessionsCommand;

    fn seeded_config(dir: &std::path::Path) -> ProcessorConfig {
        let config = ProcessorConfig {
            session_store_path: dir.join("sessions.json"),
            ..ProcessorConfig::default()
        };
        let manager = open_session_manager(&config).expect("manager");
        let meta = SessionMeta {
            branch_name: Some("claude-1-abcdef".to_string()),
            ..SessionMeta::default()
        };
        manager
            .set_session(&SessionKey::new(None, 11, 4), "s-claude", &meta, ProviderId::Claude)
            .expect("claude session");
        manager
            .set_session(
                &SessionKey::new(None, 11, 4),
                "s-codex",
                &SessionMeta::default(),
                ProviderId::Codex,
            )
            .expect("codex session");
        config
    }

    #[test]
    fn functional_sessions_list_and_show_read_the_persisted_store() {
        let dir = tempdir().expect("tempdir");
        let config = seeded_config(dir.path());
        let manager = open_session_manager(&config).expect("reopen");

        let listed = run_sessions_command(&manager, &SessionsCommand::List).expect("list");
        assert!(listed.starts_with("11:4 last_provider=codex providers=claude,codex"));
        assert!(listed.contains("branch=claude-1-abcdef"));

        let shown = run_sessions_command(
            &manager,
            &SessionsCommand::Show {
                key: "11:4".to_string(),
            },
        )
        .expect("show");
        assert!(shown.contains("\"s-codex\""));
        assert!(run_sessions_command(
            &manager,
            &SessionsCommand::Show {
                key: "11:5".to_string(),
            },
        )
        .is_err());
    }

    #[test]
    fn functional_sessions_remove_is_provider_scoped() {
        let dir = tempdir().expect("tempdir");
        let config = seeded_config(dir.path());
        let manager = open_session_manager(&config).expect("reopen");

        let output = run_sessions_command(
            &manager,
            &SessionsCommand::Remove {
                key: "11:4".to_string(),
                provider: Some(ProviderId::Codex),
            },
        )
        .expect("remove");
        assert_eq!(output, "removed codex conversation from 11:4");

        let reopened = open_session_manager(&config).expect("reopen again");
        let session = reopened.peek(&SessionKey::new(None, 11, 4)).expect("session");
        assert_eq!(session.last_provider, ProviderId::Claude);
        assert!(session.provider_session(ProviderId::Codex).is_none());
    }

    #[test]
    fn unit_sessions_stats_and_clean_report_json() {
        let dir = tempdir().expect("tempdir");
        let config = seeded_config(dir.path());
        let manager = open_session_manager(&config).expect("reopen");

        let stats = run_sessions_command(&manager, &SessionsCommand::Stats).expect("stats");
        let stats: serde_json::Value = serde_json::from_str(&stats).expect("stats json");
        assert_eq!(stats["total_sessions"], 1);
        assert_eq!(stats["total_provider_sessions"], 2);

        let cleaned = run_sessions_command(
            &manager,
            &SessionsCommand::Clean {
                max_idle_secs: Some(3_600),
            },
        )
        .expect("clean");
        let cleaned: serde_json::Value = serde_json::from_str(&cleaned).expect("clean json");
        assert_eq!(cleaned["removed_sessions"], 0);
    }
}
