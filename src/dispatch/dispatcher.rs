//! Dispatcher：分类 -> 选工具 -> 调用 -> 兜底检索 -> 组装回复
//!
//! 同一工具类别内选最具体的工具：参数可完全由消息与 scratch 填满者优先（exact 优于 partial），
//! 其次是由事实（邮箱、工单号等）填充的必填参数个数、关键词命中数、必填参数个数，最后按注册顺序。
//! 工具失败记为降级结果，不向上传播。每轮调用次数受 max_tool_calls 约束，超出则回复
//! "could not resolve" 并建议转人工。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::classifier::{classify, ConversationCategory, MessageFacts};
use super::compose::{compose_response, CLARIFYING_QUESTION, COULD_NOT_RESOLVE};
use super::planner::LlmPlanner;
use crate::config::DispatchSection;
use crate::core::SupportError;
use crate::session::{failure_count, keys, Scratch, Session};
use crate::tools::schema::declared_inputs;
use crate::tools::{ToolCallRecord, ToolCategory, ToolDescriptor, ToolExecutor};

/// 本轮调用账本：已执行记录、已尝试工具与调用上限
#[derive(Debug)]
pub(crate) struct TurnLedger {
    max_calls: usize,
    calls: Vec<ToolCallRecord>,
    tried: HashSet<String>,
    exhausted: bool,
}

impl TurnLedger {
    pub(crate) fn new(max_calls: usize) -> Self {
        Self {
            max_calls,
            calls: Vec::new(),
            tried: HashSet::new(),
            exhausted: false,
        }
    }

    pub(crate) fn has_budget(&self) -> bool {
        self.calls.len() < self.max_calls
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) fn calls(&self) -> &[ToolCallRecord] {
        &self.calls
    }

    pub(crate) fn record(&mut self, record: ToolCallRecord) {
        self.tried.insert(record.tool.clone());
        self.calls.push(record);
    }

    fn was_tried(&self, tool: &str) -> bool {
        self.tried.contains(tool)
    }

    fn any_usable(&self) -> bool {
        self.calls.iter().any(ToolCallRecord::is_usable)
    }

    /// 本轮算作失败：超出上限，或有工具降级且没有任何可用结果。
    /// 工具正常返回但为空（如检索无命中）不算失败
    fn turn_failed(&self) -> bool {
        self.exhausted
            || (self.calls.iter().any(ToolCallRecord::is_degraded) && !self.any_usable())
    }

    fn into_calls(self) -> Vec<ToolCallRecord> {
        self.calls
    }
}

/// 回复元数据：多类别意图时 ambiguous = true
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchMetadata {
    pub ambiguous: bool,
    pub categories: Vec<ConversationCategory>,
    pub tool_categories: Vec<ToolCategory>,
    /// 最终回复由 LLM 给出
    pub llm_answered: bool,
}

/// Dispatcher 的一轮结果
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub user_message: String,
    pub response_text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub updated_scratch: Scratch,
    pub metadata: DispatchMetadata,
    /// 超出调用上限时为 true
    pub recommend_escalation: bool,
}

/// 候选工具及其排序依据
struct Candidate {
    descriptor: Arc<ToolDescriptor>,
    args: Value,
    exact: bool,
    specificity: usize,
    affinity: usize,
}

impl Candidate {
    fn rank(&self) -> (bool, usize, usize, usize) {
        (
            self.exact,
            self.specificity,
            self.affinity,
            self.descriptor.required_inputs().len(),
        )
    }
}

/// 参数来源：原始消息文本，或提取 / 记住的事实
enum Filled {
    Text(Value),
    Fact(Value),
}

fn fill_input(name: &str, text: &str, facts: &MessageFacts, scratch: &Scratch) -> Option<Filled> {
    let remembered = |key: &str| scratch.get(key).and_then(Value::as_str).map(str::to_string);
    match name {
        "query" => Some(Filled::Text(json!(text))),
        "user_email" | "email" => facts
            .email
            .clone()
            .or_else(|| remembered(keys::EMAIL))
            .map(|v| Filled::Fact(json!(v))),
        "user_id" => remembered(keys::USER_ID).map(|v| Filled::Fact(json!(v))),
        "ticket_id" => facts
            .ticket_id
            .clone()
            .or_else(|| remembered(keys::TICKET_ID))
            .map(|v| Filled::Fact(json!(v))),
        "article_id" => facts.article_id.clone().map(|v| Filled::Fact(json!(v))),
        "experience_id" => facts.experience_id.clone().map(|v| Filled::Fact(json!(v))),
        "is_premium" if facts.wants_premium => Some(Filled::Fact(json!(true))),
        _ => None,
    }
}

fn build_candidate(
    descriptor: Arc<ToolDescriptor>,
    text: &str,
    lower: &str,
    facts: &MessageFacts,
    scratch: &Scratch,
) -> Candidate {
    let required = descriptor.required_inputs();
    let mut args = Map::new();
    let mut specificity = 0;
    for name in declared_inputs(descriptor.input_schema()) {
        match fill_input(name, text, facts, scratch) {
            Some(Filled::Text(v)) => {
                args.insert(name.to_string(), v);
            }
            Some(Filled::Fact(v)) => {
                if required.contains(&name) {
                    specificity += 1;
                }
                args.insert(name.to_string(), v);
            }
            None => {}
        }
    }
    let exact = required.iter().all(|r| args.contains_key(*r));
    let affinity = descriptor
        .keywords()
        .iter()
        .filter(|k| lower.contains(*k))
        .count();
    Candidate {
        descriptor,
        args: Value::Object(args),
        exact,
        specificity,
        affinity,
    }
}

/// 把消息中的事实写入 scratch；换了邮箱时丢弃旧的用户信息
fn remember_message_facts(scratch: &mut Scratch, facts: &MessageFacts) {
    if let Some(email) = &facts.email {
        let previous = scratch.get(keys::EMAIL).and_then(Value::as_str);
        if previous != Some(email.as_str()) {
            scratch.remove(keys::USER_ID);
            scratch.remove(keys::IS_BLOCKED);
        }
        scratch.insert(keys::EMAIL.to_string(), json!(email));
    }
    if let Some(ticket_id) = &facts.ticket_id {
        scratch.insert(keys::TICKET_ID.to_string(), json!(ticket_id));
    }
}

/// 把成功的工具输出中可复用的事实写入 scratch
fn absorb_output(scratch: &mut Scratch, record: &ToolCallRecord) {
    let Some(out) = record.output() else {
        return;
    };
    match record.tool.as_str() {
        "get_user_info" => {
            for key in [keys::USER_ID, keys::EMAIL, keys::IS_BLOCKED] {
                if let Some(v) = out.get(key) {
                    scratch.insert(key.to_string(), v.clone());
                }
            }
        }
        "get_ticket_info" => {
            if let Some(v) = out.get("ticket_id") {
                scratch.insert(keys::TICKET_ID.to_string(), v.clone());
            }
        }
        _ => {}
    }
}

pub struct Dispatcher {
    executor: Arc<ToolExecutor>,
    settings: DispatchSection,
    planner: Option<LlmPlanner>,
}

impl Dispatcher {
    pub fn new(executor: Arc<ToolExecutor>, settings: DispatchSection) -> Self {
        Self {
            executor,
            settings,
            planner: None,
        }
    }

    /// 启用 LLM 规划
    pub fn with_planner(mut self, planner: LlmPlanner) -> Self {
        self.planner = Some(planner);
        self
    }

    /// 类别内挑选最具体且本轮未尝试过的工具
    fn select_tool(
        &self,
        category: ToolCategory,
        text: &str,
        lower: &str,
        facts: &MessageFacts,
        scratch: &Scratch,
        ledger: &TurnLedger,
    ) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        for descriptor in self.executor.registry().list_by_category(category) {
            if ledger.was_tried(descriptor.name()) {
                continue;
            }
            let candidate = build_candidate(descriptor, text, lower, facts, scratch);
            if best.as_ref().map_or(true, |b| candidate.rank() > b.rank()) {
                best = Some(candidate);
            }
        }
        best
    }

    /// 处理一轮消息。只有内部编程错误才返回 Err
    pub async fn handle(
        &self,
        snapshot: &Session,
        user_message: &str,
    ) -> Result<DispatchOutcome, SupportError> {
        let text = user_message.trim();
        let mut scratch = snapshot.scratch.clone();

        if text.is_empty() {
            return Ok(DispatchOutcome {
                user_message: user_message.to_string(),
                response_text: CLARIFYING_QUESTION.to_string(),
                tool_calls: Vec::new(),
                updated_scratch: scratch,
                metadata: DispatchMetadata::default(),
                recommend_escalation: false,
            });
        }

        let lower = text.to_lowercase();
        let classification = classify(text);
        remember_message_facts(&mut scratch, &classification.facts);

        let mut ledger = TurnLedger::new(self.settings.max_tool_calls);
        let mut queue: VecDeque<ToolCategory> =
            classification.tool_categories.iter().copied().collect();

        while let Some(category) = queue.pop_front() {
            let Some(candidate) = self.select_tool(
                category,
                text,
                &lower,
                &classification.facts,
                &scratch,
                &ledger,
            ) else {
                continue;
            };
            if !ledger.has_budget() {
                ledger.mark_exhausted();
                break;
            }
            let record = self
                .executor
                .execute(&candidate.descriptor, candidate.args)
                .await;
            if record.is_usable() {
                absorb_output(&mut scratch, &record);
                ledger.record(record);
                // 结果补全了同类别另一个工具的参数（如 user_id），且消息明确指向它
                let follow_up = self.select_tool(
                    category,
                    text,
                    &lower,
                    &classification.facts,
                    &scratch,
                    &ledger,
                );
                if follow_up.is_some_and(|c| c.exact && c.affinity > 0) {
                    queue.push_front(category);
                }
            } else {
                ledger.record(record);
            }
        }

        if !ledger.is_exhausted() && !ledger.any_usable() {
            self.fall_back(text, &mut ledger).await?;
        }

        let mut response_text = compose_response(ledger.calls());
        let mut llm_answered = false;
        if let Some(planner) = &self.planner {
            if !ledger.is_exhausted() {
                if let Some(answer) = planner
                    .run(&self.executor, &snapshot.messages, text, &mut ledger)
                    .await
                {
                    response_text = answer;
                    llm_answered = true;
                }
            }
        }

        let exhausted = ledger.is_exhausted();
        if exhausted {
            tracing::warn!(
                thread_id = %snapshot.thread_id,
                max = self.settings.max_tool_calls,
                "tool call budget exhausted"
            );
            response_text = COULD_NOT_RESOLVE.to_string();
        }

        let failed = ledger.turn_failed();
        let failures = if failed {
            failure_count(&snapshot.scratch).saturating_add(1)
        } else {
            0
        };
        scratch.insert(keys::CONSECUTIVE_FAILURES.to_string(), json!(failures));

        let metadata = DispatchMetadata {
            ambiguous: classification.is_ambiguous(),
            categories: classification.categories.iter().copied().collect(),
            tool_categories: classification.tool_categories.clone(),
            llm_answered,
        };
        let tool_calls = ledger.into_calls();
        tracing::info!(
            thread_id = %snapshot.thread_id,
            calls = tool_calls.len(),
            failed,
            ambiguous = metadata.ambiguous,
            "dispatch finished"
        );

        Ok(DispatchOutcome {
            user_message: user_message.to_string(),
            response_text,
            tool_calls,
            updated_scratch: scratch,
            metadata,
            recommend_escalation: exhausted,
        })
    }

    /// 没有任何可用结果时退回知识库检索
    async fn fall_back(&self, text: &str, ledger: &mut TurnLedger) -> Result<(), SupportError> {
        let fallback = self.settings.fallback_tool.as_str();
        if ledger.was_tried(fallback) {
            return Ok(());
        }
        // 兜底工具在启动时注册，找不到属于装配错误
        let descriptor = self
            .executor
            .registry()
            .lookup(fallback)
            .map_err(|e| SupportError::Internal(format!("fallback tool unavailable: {e}")))?;
        if !ledger.has_budget() {
            ledger.mark_exhausted();
            return Ok(());
        }
        tracing::debug!(tool = fallback, "falling back to knowledge search");
        let record = self.executor.execute(&descriptor, json!({ "query": text })).await;
        ledger.record(record);
        Ok(())
    }
}
