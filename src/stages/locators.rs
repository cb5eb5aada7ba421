// src/stages/locators.rs

use crate::engine::{Deps, StageContext, StageFuture, Step, map_records};
use crate::envelope::{Envelope, Record};
use crate::locator::check_locator;
use crate::stages::names;

pub fn validate_locators(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let policy = env.meta.locator_policy_or_default();
        map_records(names::VALIDATE_LOCATORS, &ctx, env, move |record: Record| {
            let verdict = check_locator(&record.locator, &policy);
            async move {
                match verdict {
                    Ok(()) => Step::Keep(record),
                    Err(msg) => Step::Fail(record, msg),
                }
            }
        })
        .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ErrorMode, ErrorPolicy, LocatorPolicy};

    fn env_with(mode: ErrorMode, policy: LocatorPolicy, locators: &[&str]) -> Envelope {
        Envelope::from_config(&Config {
            errors: ErrorPolicy {
                mode,
                embed_errors: true,
            },
            locator_policy: policy,
            ..Config::default()
        })
        .with_records(locators.iter().map(|l| Record::new(*l)).collect())
    }

    #[tokio::test]
    async fn violations_are_reported_per_record() {
        let env = env_with(
            ErrorMode::KeepGoing,
            LocatorPolicy::default(),
            &["docs/a.md", "/etc/passwd", "../up", "https://x.test/a"],
        );
        let out = validate_locators(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(out.records.len(), 4);
        assert_eq!(out.successful_records(), 1);
        let messages: Vec<_> = out.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "parent directory references are not allowed",
                "absolute locators are not allowed",
                "URL locators are not allowed",
            ]
        );
    }

    #[tokio::test]
    async fn urls_pass_when_allowed() {
        let policy = LocatorPolicy {
            allow_urls: true,
            ..LocatorPolicy::default()
        };
        let env = env_with(ErrorMode::FailFast, policy, &["https://x.test/a"]);
        let out = validate_locators(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(out.successful_records(), 1);
    }

    #[tokio::test]
    async fn fail_fast_stops_at_the_first_violation() {
        let env = env_with(ErrorMode::FailFast, LocatorPolicy::default(), &["ok", "../bad"]);
        let err = validate_locators(StageContext::new(), env, Deps::stdio()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "validate-locators: parent directory references are not allowed"
        );
    }
}
