//! Constructors for the standard OneBot v11 actions.
//!
//! Each function builds the [`Action`] for one API endpoint. None of them
//! attach an echo id; callers decide between fire-and-forget and awaited
//! execution at send time.

use serde_json::json;

use crate::action::Action;
use crate::event::{Event, MessageScope};
use crate::message::Message;

/// `send_private_msg` — send a message to a user.
pub fn send_private_msg(user_id: i64, message: &Message) -> Action {
    Action::new(
        "send_private_msg",
        json!({ "user_id": user_id, "message": message }),
    )
}

/// `send_group_msg` — send a message to a group.
pub fn send_group_msg(group_id: i64, message: &Message) -> Action {
    Action::new(
        "send_group_msg",
        json!({ "group_id": group_id, "message": message }),
    )
}

/// `send_msg` — reply into the conversation a message event came from.
///
/// Returns `None` when the event is not a message event.
pub fn send_msg(event: &Event, message: &Message) -> Option<Action> {
    let msg_event = event.message()?;
    Some(match &msg_event.scope {
        MessageScope::Private { .. } => send_private_msg(msg_event.user_id, message),
        MessageScope::Group { group_id, .. } => send_group_msg(*group_id, message),
    })
}

/// `delete_msg` — recall a message.
pub fn delete_msg(message_id: i64) -> Action {
    Action::new("delete_msg", json!({ "message_id": message_id }))
}

/// `get_msg` — fetch a message by id.
pub fn get_msg(message_id: i64) -> Action {
    Action::new("get_msg", json!({ "message_id": message_id }))
}

/// `send_like` — send profile likes.
pub fn send_like(user_id: i64, times: u32) -> Action {
    Action::new("send_like", json!({ "user_id": user_id, "times": times }))
}

/// `set_group_kick` — remove a member from a group.
pub fn set_group_kick(group_id: i64, user_id: i64, reject_add_request: bool) -> Action {
    Action::new(
        "set_group_kick",
        json!({
            "group_id": group_id,
            "user_id": user_id,
            "reject_add_request": reject_add_request,
        }),
    )
}

/// `set_group_ban` — mute a member. `duration` is in seconds; 0 unmutes.
pub fn set_group_ban(group_id: i64, user_id: i64, duration: u64) -> Action {
    Action::new(
        "set_group_ban",
        json!({
            "group_id": group_id,
            "user_id": user_id,
            "duration": duration,
        }),
    )
}

/// `set_group_leave` — leave (or, as owner, dismiss) a group.
pub fn set_group_leave(group_id: i64, is_dismiss: bool) -> Action {
    Action::new(
        "set_group_leave",
        json!({ "group_id": group_id, "is_dismiss": is_dismiss }),
    )
}

/// `set_friend_add_request` — approve or reject a friend request.
pub fn set_friend_add_request(flag: &str, approve: bool, remark: Option<&str>) -> Action {
    let mut params = json!({ "flag": flag, "approve": approve });
    if let Some(remark) = remark {
        params["remark"] = json!(remark);
    }
    Action::new("set_friend_add_request", params)
}

/// `set_group_add_request` — approve or reject a group join request or
/// invitation. `sub_type` is `"add"` or `"invite"`, matching the request
/// event.
pub fn set_group_add_request(
    flag: &str,
    sub_type: &str,
    approve: bool,
    reason: Option<&str>,
) -> Action {
    let mut params = json!({ "flag": flag, "sub_type": sub_type, "approve": approve });
    if let Some(reason) = reason {
        params["reason"] = json!(reason);
    }
    Action::new("set_group_add_request", params)
}

/// `get_login_info` — fetch the bot account identity.
pub fn get_login_info() -> Action {
    Action::new("get_login_info", json!({}))
}

/// `get_group_member_info` — fetch one member's group profile.
pub fn get_group_member_info(group_id: i64, user_id: i64, no_cache: bool) -> Action {
    Action::new(
        "get_group_member_info",
        json!({ "group_id": group_id, "user_id": user_id, "no_cache": no_cache }),
    )
}

/// An arbitrary action for endpoints this crate has no constructor for.
pub fn custom_action(ty: impl Into<String>, params: serde_json::Value) -> Action {
    Action::new(ty, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_msg_resolves_scope() {
        let event = Event::parse(json!({
            "post_type": "message", "message_type": "group",
            "time": 1, "self_id": 10, "message_id": 1, "user_id": 20,
            "group_id": 300, "message": "hi"
        }))
        .unwrap();

        let action = send_msg(&event, &Message::from_text("pong")).unwrap();
        assert_eq!(action.ty, "send_group_msg");
        assert_eq!(action.params["group_id"], 300);
        assert_eq!(action.params["message"][0]["data"]["text"], "pong");
    }

    #[test]
    fn test_send_msg_refuses_non_message() {
        let event = Event::parse(json!({
            "post_type": "notice", "notice_type": "friend_add",
            "time": 1, "self_id": 10, "user_id": 20
        }))
        .unwrap();
        assert!(send_msg(&event, &Message::from_text("x")).is_none());
    }

    #[test]
    fn test_request_reply_params() {
        let action = set_group_add_request("flag", "invite", true, None);
        assert_eq!(action.params["sub_type"], "invite");
        assert!(action.params.get("reason").is_none());
    }
}
