//! 回复组装
//!
//! 把本轮可用的工具结果按工具格式化为面向用户的文本；没有可用结果时给出澄清或道歉。

use serde_json::Value;

use crate::tools::{ToolCallRecord, ToolCategory, ToolOutcome};

/// 空消息时的澄清问题
pub const CLARIFYING_QUESTION: &str =
    "Could you tell me a bit more about what you need help with, for example your booking, your subscription or a ticket number?";

/// 超出本轮调用上限时的回复
pub const COULD_NOT_RESOLVE: &str =
    "I'm sorry, I could not resolve your request automatically.";

const NOTHING_FOUND: &str =
    "I'm sorry, I couldn't find anything about that. Could you give me a bit more detail?";

const ASK_FOR_EMAIL: &str =
    "Could you share the email address linked to your CultPass account so I can look it up?";

/// 列表最多展示条数
const MAX_LIST_ITEMS: usize = 5;

pub fn compose_response(records: &[ToolCallRecord]) -> String {
    let mut sections: Vec<String> = records
        .iter()
        .filter(|r| r.is_usable())
        .filter_map(|r| r.output().and_then(|out| format_output(&r.tool, out)))
        .collect();

    let needs_email = records.iter().any(|r| {
        r.category == ToolCategory::User
            && matches!(&r.outcome, ToolOutcome::Degraded { kind, .. } if kind == "schema_mismatch")
    });
    if needs_email {
        sections.push(ASK_FOR_EMAIL.to_string());
    }

    if sections.is_empty() {
        NOTHING_FOUND.to_string()
    } else {
        sections.join("\n\n")
    }
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

/// RFC3339 时间只保留日期部分
fn date(value: &Value, key: &str) -> String {
    let raw = text(value, key);
    raw.get(..10).unwrap_or(raw).to_string()
}

fn bullet_list(items: &[Value], line: impl Fn(&Value) -> String) -> String {
    let mut out: Vec<String> = items.iter().take(MAX_LIST_ITEMS).map(|v| format!("- {}", line(v))).collect();
    if items.len() > MAX_LIST_ITEMS {
        out.push(format!("- ...and {} more", items.len() - MAX_LIST_ITEMS));
    }
    out.join("\n")
}

fn format_output(tool: &str, out: &Value) -> Option<String> {
    let formatted = match tool {
        "search_knowledge_base" => {
            let hits = out.as_array()?;
            format!(
                "Here is what I found in our help center:\n{}",
                bullet_list(hits, |h| format!("{}: {}", text(h, "title"), text(h, "snippet")))
            )
        }
        "get_article_by_id" => format!("{}\n{}", text(out, "title"), text(out, "content")),
        "get_user_info" => {
            let mut s = format!(
                "I found the account for {} ({}).",
                text(out, "full_name"),
                text(out, "email")
            );
            if out.get("is_blocked").and_then(Value::as_bool) == Some(true) {
                s.push_str(" The account is currently blocked.");
            }
            s
        }
        "get_user_subscription" => format!(
            "Your {} subscription is {}, with {} experiences per month.",
            text(out, "tier"),
            text(out, "status"),
            out.get("monthly_quota").and_then(Value::as_u64).unwrap_or(0)
        ),
        "get_user_reservations" => {
            let items = out.as_array()?;
            format!(
                "Your reservations:\n{}",
                bullet_list(items, |r| format!(
                    "{} in {} on {} ({})",
                    text(r, "experience_title"),
                    text(r, "experience_location"),
                    date(r, "experience_when"),
                    text(r, "status")
                ))
            )
        }
        "get_available_experiences" => {
            let items = out.as_array()?;
            format!(
                "Upcoming experiences with free slots:\n{}",
                bullet_list(items, experience_line)
            )
        }
        "get_experience_details" => experience_line(out),
        "get_ticket_info" => {
            let mut s = format!("Ticket {} is {}", text(out, "ticket_id"), text(out, "status"));
            let issue = text(out, "main_issue_type");
            if !issue.is_empty() {
                s.push_str(&format!(" (issue: {issue})"));
            }
            s.push('.');
            s
        }
        "update_ticket_status" => format!(
            "Ticket {} is now {}.",
            text(out, "ticket_id"),
            text(out, "status")
        ),
        "add_ticket_message" => "Your note was added to the ticket.".to_string(),
        _ => serde_json::to_string_pretty(out).ok()?,
    };
    Some(formatted)
}

fn experience_line(e: &Value) -> String {
    let premium = if e.get("is_premium").and_then(Value::as_bool) == Some(true) {
        ", premium"
    } else {
        ""
    };
    format!(
        "{} [{}] in {} on {} ({} slots left{})",
        text(e, "title"),
        text(e, "experience_id"),
        text(e, "location"),
        date(e, "when"),
        e.get("slots_available").and_then(Value::as_u64).unwrap_or(0),
        premium
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(tool: &str, output: Value) -> ToolCallRecord {
        ToolCallRecord {
            tool: tool.into(),
            category: ToolCategory::Knowledge,
            args: json!({}),
            outcome: ToolOutcome::Success { output },
            duration_ms: 1,
        }
    }

    fn degraded(tool: &str, kind: &str) -> ToolCallRecord {
        ToolCallRecord {
            tool: tool.into(),
            category: ToolCategory::User,
            args: json!({}),
            outcome: ToolOutcome::Degraded {
                kind: kind.into(),
                reason: "x".into(),
            },
            duration_ms: 1,
        }
    }

    #[test]
    fn search_hits_become_bullets() {
        let text = compose_response(&[ok(
            "search_knowledge_base",
            json!([{"article_id": "KB-002", "title": "Refund policy", "snippet": "7 days", "score": 4}]),
        )]);
        assert!(text.contains("- Refund policy: 7 days"));
    }

    #[test]
    fn blocked_user_is_mentioned() {
        let text = compose_response(&[ok(
            "get_user_info",
            json!({"user_id": "u-200", "full_name": "Bruno Lima", "email": "bruno@example.com", "is_blocked": true}),
        )]);
        assert!(text.contains("Bruno Lima"));
        assert!(text.contains("blocked"));
    }

    #[test]
    fn missing_email_asks_for_it() {
        let text = compose_response(&[degraded("get_user_info", "schema_mismatch")]);
        assert_eq!(text, ASK_FOR_EMAIL);
    }

    #[test]
    fn nothing_usable_apologises() {
        let text = compose_response(&[
            degraded("get_user_info", "timeout"),
            ok("search_knowledge_base", json!([])),
        ]);
        assert_eq!(text, NOTHING_FOUND);
    }
}
