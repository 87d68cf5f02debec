//! # Rate Limiting
//!
//! Per-session command gate with two independent rules:
//!
//! - **Cooldown**: minimum interval between accepted commands in the
//!   session, whoever sends them. A single-slot `governor` limiter.
//! - **User window**: at most N commands per user in any rolling window.
//!   A log of recent command times per user, on tokio time.
//!
//! The user window is checked first, so a command the cooldown rejects
//! still counts against the sender's window. A limit configured as zero is
//! disabled.
//!
//! The limiter lives as long as its session; a fresh session starts with
//! clean state.

use bridge_traits::UserId;
use core_runtime::config::OrchestratorConfig;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Which rule rejected a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitRule {
    Cooldown,
    UserWindow,
}

/// A rejected command and how long until it would be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDenial {
    pub rule: RateLimitRule,
    pub retry_after: Duration,
}

impl fmt::Display for RateLimitDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // round up so "0s" is never shown
        let secs = self.retry_after.as_secs_f64().ceil().max(1.0) as u64;
        match self.rule {
            RateLimitRule::Cooldown => write!(
                f,
                "Please wait {}s before sending another command",
                secs
            ),
            RateLimitRule::UserWindow => {
                write!(f, "Too many requests. Try again in {}s", secs)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied(RateLimitDenial),
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }

    pub fn into_result(self) -> Result<(), RateLimitDenial> {
        match self {
            RateDecision::Allowed => Ok(()),
            RateDecision::Denied(denial) => Err(denial),
        }
    }
}

pub struct SessionRateLimiter {
    cooldown: Option<DefaultDirectRateLimiter>,
    per_user: Option<UserWindow>,
    clock: DefaultClock,
}

impl SessionRateLimiter {
    /// Limiter allowing one command per `cooldown` and `per_user` commands
    /// per user in any `window`.
    pub fn new(cooldown: Duration, per_user: u32, window: Duration) -> Self {
        let cooldown = Quota::with_period(cooldown).map(RateLimiter::direct);
        let per_user = (per_user > 0 && !window.is_zero()).then(|| UserWindow {
            limit: per_user as usize,
            window,
            log: DashMap::new(),
        });

        Self {
            cooldown,
            per_user,
            clock: DefaultClock::default(),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            config.command_cooldown,
            config.per_user_requests_per_window,
            config.window,
        )
    }

    /// Check and, when allowed, record a command from `user`.
    pub fn check(&self, user: UserId) -> RateDecision {
        if let Some(window) = &self.per_user {
            if let Err(retry_after) = window.check(user, Instant::now()) {
                return RateDecision::Denied(RateLimitDenial {
                    rule: RateLimitRule::UserWindow,
                    retry_after,
                });
            }
        }

        if let Some(limiter) = &self.cooldown {
            if let Err(not_until) = limiter.check() {
                return RateDecision::Denied(RateLimitDenial {
                    rule: RateLimitRule::Cooldown,
                    retry_after: not_until.wait_time_from(self.clock.now()),
                });
            }
        }

        RateDecision::Allowed
    }

    /// Forget users with no command inside the current window.
    pub fn retain_recent(&self) {
        if let Some(window) = &self.per_user {
            window.retain_recent(Instant::now());
        }
    }

    /// Number of users currently tracked by the window rule.
    pub fn tracked_users(&self) -> usize {
        self.per_user.as_ref().map_or(0, |window| window.log.len())
    }

    pub fn is_unlimited(&self) -> bool {
        self.cooldown.is_none() && self.per_user.is_none()
    }
}

impl fmt::Debug for SessionRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRateLimiter")
            .field("cooldown", &self.cooldown.is_some())
            .field("per_user", &self.per_user.as_ref().map(|w| (w.limit, w.window)))
            .field("tracked_users", &self.tracked_users())
            .finish()
    }
}

/// Accepted command times per user, oldest first.
struct UserWindow {
    limit: usize,
    window: Duration,
    log: DashMap<UserId, VecDeque<Instant>>,
}

impl UserWindow {
    /// Record a command at `now`, or return how long until the oldest
    /// entry leaves the window.
    fn check(&self, user: UserId, now: Instant) -> Result<(), Duration> {
        let mut entries = self.log.entry(user).or_default();
        prune(&mut entries, now, self.window);

        if entries.len() >= self.limit {
            let oldest = entries.front().copied().unwrap_or(now);
            return Err((oldest + self.window).saturating_duration_since(now));
        }
        entries.push_back(now);
        Ok(())
    }

    fn retain_recent(&self, now: Instant) {
        self.log.retain(|_, entries| {
            prune(entries, now, self.window);
            !entries.is_empty()
        });
    }
}

fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while entries
        .front()
        .map_or(false, |&at| now.saturating_duration_since(at) >= window)
    {
        entries.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    #[test]
    fn test_user_window_denies_request_over_limit() {
        let limiter = SessionRateLimiter::new(Duration::ZERO, 3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(limiter.check(ALICE).is_allowed());
        }
        match limiter.check(ALICE) {
            RateDecision::Denied(denial) => {
                assert_eq!(denial.rule, RateLimitRule::UserWindow);
                assert!(denial.retry_after > Duration::from_secs(59));
                assert!(denial.retry_after <= Duration::from_secs(60));
            }
            RateDecision::Allowed => panic!("fourth request should be denied"),
        }

        // other users have their own window
        assert!(limiter.check(BOB).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_window_counts_requests_spread_over_window() {
        let limiter = SessionRateLimiter::new(Duration::ZERO, 3, Duration::from_secs(60));

        // t = 0s, 20s, 40s
        assert!(limiter.check(ALICE).is_allowed());
        advance(Duration::from_secs(20)).await;
        assert!(limiter.check(ALICE).is_allowed());
        advance(Duration::from_secs(20)).await;
        assert!(limiter.check(ALICE).is_allowed());

        // t = 59s: all three are still inside the window
        advance(Duration::from_secs(19)).await;
        let denial = limiter.check(ALICE).into_result().unwrap_err();
        assert_eq!(denial.rule, RateLimitRule::UserWindow);
        assert_eq!(denial.retry_after, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_window_frees_slot_when_oldest_expires() {
        let limiter = SessionRateLimiter::new(Duration::ZERO, 3, Duration::from_secs(60));

        // t = 0s, 20s, 40s
        for i in 0..3 {
            if i > 0 {
                advance(Duration::from_secs(20)).await;
            }
            assert!(limiter.check(ALICE).is_allowed());
        }

        // t = 50s
        advance(Duration::from_secs(10)).await;
        let denial = limiter.check(ALICE).into_result().unwrap_err();
        assert_eq!(denial.rule, RateLimitRule::UserWindow);
        assert_eq!(denial.retry_after, Duration::from_secs(10));

        // t = 60s: the first request has left the window
        advance(Duration::from_secs(10)).await;
        assert!(limiter.check(ALICE).is_allowed());
        let denial = limiter.check(ALICE).into_result().unwrap_err();
        assert_eq!(denial.retry_after, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retain_recent_forgets_idle_users() {
        let limiter = SessionRateLimiter::new(Duration::ZERO, 2, Duration::from_secs(60));
        assert!(limiter.check(ALICE).is_allowed());
        advance(Duration::from_secs(30)).await;
        assert!(limiter.check(BOB).is_allowed());

        advance(Duration::from_secs(31)).await;
        limiter.retain_recent();

        assert_eq!(limiter.tracked_users(), 1);
    }

    #[test]
    fn test_cooldown_applies_across_users() {
        let limiter = SessionRateLimiter::new(Duration::from_secs(2), 0, Duration::from_secs(60));

        assert!(limiter.check(ALICE).is_allowed());
        let denial = limiter.check(BOB).into_result().unwrap_err();
        assert_eq!(denial.rule, RateLimitRule::Cooldown);
        assert!(denial.retry_after <= Duration::from_secs(2));
    }

    #[test]
    fn test_cooldown_denial_counts_against_window() {
        let limiter = SessionRateLimiter::new(Duration::from_secs(30), 2, Duration::from_secs(60));

        assert!(limiter.check(ALICE).is_allowed());
        assert_eq!(
            limiter.check(ALICE).into_result().unwrap_err().rule,
            RateLimitRule::Cooldown
        );
        assert_eq!(
            limiter.check(ALICE).into_result().unwrap_err().rule,
            RateLimitRule::UserWindow
        );
    }

    #[test]
    fn test_cooldown_expires() {
        let limiter = SessionRateLimiter::new(Duration::from_millis(50), 0, Duration::from_secs(60));
        assert!(limiter.check(ALICE).is_allowed());
        assert!(!limiter.check(ALICE).is_allowed());

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.check(ALICE).is_allowed());
    }

    #[test]
    fn test_zero_limits_disable_rules() {
        let limiter = SessionRateLimiter::new(Duration::ZERO, 0, Duration::from_secs(60));
        assert!(limiter.is_unlimited());
        assert!(SessionRateLimiter::new(Duration::ZERO, 5, Duration::ZERO).is_unlimited());
        for _ in 0..100 {
            assert!(limiter.check(ALICE).is_allowed());
        }
    }

    #[test]
    fn test_from_config_defaults() {
        let limiter = SessionRateLimiter::from_config(&OrchestratorConfig::default());
        assert!(!limiter.is_unlimited());
        assert!(limiter.check(ALICE).is_allowed());
        assert_eq!(limiter.tracked_users(), 1);
    }

    #[test]
    fn test_denial_messages() {
        let denial = RateLimitDenial {
            rule: RateLimitRule::Cooldown,
            retry_after: Duration::from_millis(300),
        };
        assert_eq!(
            denial.to_string(),
            "Please wait 1s before sending another command"
        );

        let denial = RateLimitDenial {
            rule: RateLimitRule::UserWindow,
            retry_after: Duration::from_millis(12_100),
        };
        assert_eq!(denial.to_string(), "Too many requests. Try again in 13s");
    }
}
