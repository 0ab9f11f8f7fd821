//! Event checkers.
//!
//! A checker decides whether an event qualifies for a handler. Checkers
//! compose into a boolean algebra through [`CheckerExt`]: `a.and(b)`,
//! `a.or(b)`, `a.xor(b)`, `a.negate()`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use solder_core::{Event, Segment};

use crate::logic::LogicMode;

/// An optional async callback fired on check outcomes.
pub type CheckCb = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// The check predicate trait.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Returns true when the event qualifies.
    async fn check(&self, event: &Event) -> bool;
}

/// Combinators for composing checkers.
pub trait CheckerExt: Checker + Sized + 'static {
    /// Both must pass.
    fn and(self, other: impl Checker + 'static) -> WrappedChecker {
        WrappedChecker::binary(LogicMode::And, self, other)
    }

    /// Either must pass.
    fn or(self, other: impl Checker + 'static) -> WrappedChecker {
        WrappedChecker::binary(LogicMode::Or, self, other)
    }

    /// Exactly one must pass.
    fn xor(self, other: impl Checker + 'static) -> WrappedChecker {
        WrappedChecker::binary(LogicMode::Xor, self, other)
    }

    /// Inverts the result.
    fn negate(self) -> WrappedChecker {
        WrappedChecker::unary(LogicMode::Not, self)
    }
}

impl<C: Checker + Sized + 'static> CheckerExt for C {}

/// A checker combining one or two children under a [`LogicMode`].
///
/// `And` and `Or` short-circuit on the first operand.
pub struct WrappedChecker {
    mode: LogicMode,
    c1: Box<dyn Checker>,
    c2: Option<Box<dyn Checker>>,
}

impl WrappedChecker {
    fn binary(mode: LogicMode, c1: impl Checker + 'static, c2: impl Checker + 'static) -> Self {
        Self {
            mode,
            c1: Box::new(c1),
            c2: Some(Box::new(c2)),
        }
    }

    fn unary(mode: LogicMode, c1: impl Checker + 'static) -> Self {
        Self {
            mode,
            c1: Box::new(c1),
            c2: None,
        }
    }
}

#[async_trait]
impl Checker for WrappedChecker {
    async fn check(&self, event: &Event) -> bool {
        let v1 = self.c1.check(event).await;
        match (self.mode, &self.c2) {
            (LogicMode::And, Some(c2)) => v1 && c2.check(event).await,
            (LogicMode::Or, Some(c2)) => v1 || c2.check(event).await,
            (mode, Some(c2)) => mode.calc(v1, Some(c2.check(event).await)),
            (mode, None) => mode.calc(v1, None),
        }
    }
}

/// A checker wrapping a plain predicate.
pub struct FnChecker<F>(pub F);

#[async_trait]
impl<F> Checker for FnChecker<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    async fn check(&self, event: &Event) -> bool {
        (self.0)(event)
    }
}

// ============================================================================
// Access levels
// ============================================================================

/// User access tiers, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UserLevel {
    /// Blacklisted; never passes a level check.
    Black,
    /// Everyone else.
    Normal,
    /// Whitelisted user.
    White,
    /// Super user.
    Su,
    /// The bot owner.
    Owner,
}

/// The identity lists a level checker grades against.
#[derive(Debug, Clone, Default)]
pub struct LevelRoster {
    /// The owner's user id.
    pub owner: Option<i64>,
    /// Super user ids.
    pub super_users: Vec<i64>,
    /// Whitelisted user ids.
    pub white_users: Vec<i64>,
    /// Blacklisted user ids.
    pub black_users: Vec<i64>,
}

impl LevelRoster {
    /// Grades a user id against the lists.
    pub fn level_of(&self, user_id: i64) -> UserLevel {
        if self.black_users.contains(&user_id) {
            UserLevel::Black
        } else if self.owner == Some(user_id) {
            UserLevel::Owner
        } else if self.super_users.contains(&user_id) {
            UserLevel::Su
        } else if self.white_users.contains(&user_id) {
            UserLevel::White
        } else {
            UserLevel::Normal
        }
    }
}

/// Scope restriction for [`MsgLvlChecker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MsgScope {
    Any,
    Private,
    Group,
}

/// Message-event access-level checker.
///
/// Passes when the sender grades at or above the required level (and is not
/// blacklisted). The group variant additionally requires the group to be
/// whitelisted; an empty group whitelist rejects every group message.
pub struct MsgLvlChecker {
    level: UserLevel,
    roster: LevelRoster,
    white_groups: Vec<i64>,
    scope: MsgScope,
    ok_cb: Option<CheckCb>,
    fail_cb: Option<CheckCb>,
}

impl MsgLvlChecker {
    /// A checker over both private and group messages.
    pub fn new(level: UserLevel, roster: LevelRoster) -> Self {
        Self {
            level,
            roster,
            white_groups: Vec::new(),
            scope: MsgScope::Any,
            ok_cb: None,
            fail_cb: None,
        }
    }

    /// A checker accepting only private messages.
    pub fn private(level: UserLevel, roster: LevelRoster) -> Self {
        Self {
            scope: MsgScope::Private,
            ..Self::new(level, roster)
        }
    }

    /// A checker accepting only whitelisted group messages.
    pub fn group(level: UserLevel, roster: LevelRoster, white_groups: Vec<i64>) -> Self {
        Self {
            scope: MsgScope::Group,
            white_groups,
            ..Self::new(level, roster)
        }
    }

    /// Attaches a callback fired when a check passes.
    pub fn on_ok(mut self, cb: CheckCb) -> Self {
        self.ok_cb = Some(cb);
        self
    }

    /// Attaches a callback fired when a check fails.
    pub fn on_fail(mut self, cb: CheckCb) -> Self {
        self.fail_cb = Some(cb);
        self
    }

    fn graded_check(&self, event: &Event) -> bool {
        let Some(msg) = event.message() else {
            return false;
        };
        match self.scope {
            MsgScope::Private if !msg.is_private() => return false,
            MsgScope::Group => {
                let Some(group_id) = msg.group_id() else {
                    return false;
                };
                if !self.white_groups.contains(&group_id) {
                    return false;
                }
            }
            _ => {}
        }
        let level = self.roster.level_of(msg.user_id);
        level != UserLevel::Black && level >= self.level
    }
}

#[async_trait]
impl Checker for MsgLvlChecker {
    async fn check(&self, event: &Event) -> bool {
        let status = self.graded_check(event);
        if status {
            if let Some(cb) = &self.ok_cb {
                cb().await;
            }
        } else if let Some(cb) = &self.fail_cb {
            cb().await;
        }
        status
    }
}

/// The lists a bot grades against, packaged as a checker factory.
#[derive(Debug, Clone, Default)]
pub struct LevelCheckerFactory {
    /// The identity lists shared by all produced checkers.
    pub roster: LevelRoster,
    /// Group whitelist for the group variant.
    pub white_groups: Vec<i64>,
}

impl LevelCheckerFactory {
    /// A checker over all message events at the given level.
    pub fn base(&self, level: UserLevel) -> MsgLvlChecker {
        MsgLvlChecker::new(level, self.roster.clone())
    }

    /// A private-message checker at the given level.
    pub fn private(&self, level: UserLevel) -> MsgLvlChecker {
        MsgLvlChecker::private(level, self.roster.clone())
    }

    /// A group-message checker at the given level.
    pub fn group(&self, level: UserLevel) -> MsgLvlChecker {
        MsgLvlChecker::group(level, self.roster.clone(), self.white_groups.clone())
    }
}

// ============================================================================
// At-mention checker
// ============================================================================

/// Passes for message events that @mention someone.
///
/// With a target id, only mentions of that id (or @all) pass; without one,
/// any mention passes.
pub struct AtMsgChecker {
    target: Option<i64>,
}

impl AtMsgChecker {
    /// A checker for mentions of a specific user.
    pub fn new(target: i64) -> Self {
        Self {
            target: Some(target),
        }
    }

    /// A checker for any mention.
    pub fn any() -> Self {
        Self { target: None }
    }
}

#[async_trait]
impl Checker for AtMsgChecker {
    async fn check(&self, event: &Event) -> bool {
        let Some(msg) = event.message() else {
            return false;
        };
        let has_any_at = msg
            .message
            .iter()
            .any(|seg| matches!(seg, Segment::At(_)));
        match self.target {
            None => has_any_at,
            Some(target) => {
                msg.message.mentions_all() || msg.message.mentioned_users().contains(&target)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_msg(user: i64, group: i64, message: serde_json::Value) -> Event {
        Event::parse(json!({
            "post_type": "message", "message_type": "group",
            "time": 1, "self_id": 10, "message_id": 1,
            "user_id": user, "group_id": group,
            "sender": {"user_id": user},
            "message": message
        }))
        .unwrap()
    }

    fn private_msg(user: i64) -> Event {
        Event::parse(json!({
            "post_type": "message", "message_type": "private",
            "time": 1, "self_id": 10, "message_id": 1,
            "user_id": user,
            "sender": {"user_id": user},
            "message": "hi"
        }))
        .unwrap()
    }

    fn roster() -> LevelRoster {
        LevelRoster {
            owner: Some(1),
            super_users: vec![2],
            white_users: vec![3],
            black_users: vec![4],
        }
    }

    #[tokio::test]
    async fn test_level_grading() {
        let checker = MsgLvlChecker::new(UserLevel::White, roster());
        assert!(checker.check(&private_msg(1)).await);
        assert!(checker.check(&private_msg(2)).await);
        assert!(checker.check(&private_msg(3)).await);
        assert!(!checker.check(&private_msg(5)).await);
        // Blacklisted never passes, whatever the required level.
        let lax = MsgLvlChecker::new(UserLevel::Normal, roster());
        assert!(!lax.check(&private_msg(4)).await);
    }

    #[tokio::test]
    async fn test_group_whitelist() {
        let factory = LevelCheckerFactory {
            roster: roster(),
            white_groups: vec![300],
        };
        let checker = factory.group(UserLevel::Normal);
        assert!(checker.check(&group_msg(5, 300, json!("x"))).await);
        assert!(!checker.check(&group_msg(5, 301, json!("x"))).await);
        assert!(!checker.check(&private_msg(5)).await);

        // No whitelist means no group passes.
        let closed = MsgLvlChecker::group(UserLevel::Normal, roster(), vec![]);
        assert!(!closed.check(&group_msg(5, 300, json!("x"))).await);
    }

    #[tokio::test]
    async fn test_at_checker() {
        let at_me = json!([{"type": "at", "data": {"qq": "10"}}]);
        let at_other = json!([{"type": "at", "data": {"qq": "77"}}]);
        let at_all = json!([{"type": "at", "data": {"qq": "all"}}]);

        let checker = AtMsgChecker::new(10);
        assert!(checker.check(&group_msg(5, 300, at_me.clone())).await);
        assert!(!checker.check(&group_msg(5, 300, at_other.clone())).await);
        assert!(checker.check(&group_msg(5, 300, at_all)).await);

        let any = AtMsgChecker::any();
        assert!(any.check(&group_msg(5, 300, at_other)).await);
        assert!(!any.check(&group_msg(5, 300, json!("plain"))).await);
    }

    #[tokio::test]
    async fn test_checker_algebra() {
        let both = FnChecker(|e: &Event| e.self_id() == 10)
            .and(FnChecker(|e: &Event| e.text() == "hi"));
        assert!(both.check(&private_msg(5)).await);

        let neither = FnChecker(|e: &Event| e.self_id() == 10).negate();
        assert!(!neither.check(&private_msg(5)).await);

        let one = FnChecker(|e: &Event| e.self_id() == 10)
            .xor(FnChecker(|e: &Event| e.text() == "hi"));
        assert!(!one.check(&private_msg(5)).await);
    }
}
