//! 客服会话端到端测试：handle_turn 经 Dispatcher、转人工策略与会话存储的完整流程

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use udahub::agent::{create_session_manager, create_session_manager_with};
    use udahub::backends::{
        Article, ArticleHit, Backends, InMemoryAccounts, InMemoryExperiences, InMemoryTickets,
        KnowledgeBackend,
    };
    use udahub::config::AppConfig;
    use udahub::core::BackendError;
    use udahub::manager::HANDOFF_MESSAGE;
    use tokio_util::sync::CancellationToken;
    use udahub::core::SupportError;
    use udahub::session::{keys, MemorySessionStore, Role};
    use udahub::{EscalationReason, SessionManager};

    /// 始终不可用的知识库
    struct DownKnowledge;

    #[async_trait]
    impl KnowledgeBackend for DownKnowledge {
        async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<ArticleHit>, BackendError> {
            Err(BackendError::Unavailable("knowledge db offline".into()))
        }

        async fn get_article(&self, _article_id: &str) -> Result<Article, BackendError> {
            Err(BackendError::Unavailable("knowledge db offline".into()))
        }
    }

    /// 每次检索都耗时的知识库
    struct SlowKnowledge(Duration);

    #[async_trait]
    impl KnowledgeBackend for SlowKnowledge {
        async fn search(&self, query: &str, _top_k: usize) -> Result<Vec<ArticleHit>, BackendError> {
            tokio::time::sleep(self.0).await;
            Ok(vec![ArticleHit {
                article_id: "KB-100".into(),
                title: "Slow answer".into(),
                snippet: query.to_string(),
                score: 1,
            }])
        }

        async fn get_article(&self, article_id: &str) -> Result<Article, BackendError> {
            Err(BackendError::NotFound(article_id.to_string()))
        }
    }

    fn backends_with(knowledge: Arc<dyn KnowledgeBackend>) -> Backends {
        Backends {
            knowledge,
            accounts: Arc::new(InMemoryAccounts::demo()),
            experiences: Arc::new(InMemoryExperiences::demo()),
            tickets: Arc::new(InMemoryTickets::demo()),
        }
    }

    fn manager_with(cfg: &AppConfig, knowledge: Arc<dyn KnowledgeBackend>) -> SessionManager {
        create_session_manager_with(
            cfg,
            &backends_with(knowledge),
            Arc::new(MemorySessionStore::new()),
        )
        .unwrap()
    }

    async fn demo_manager() -> SessionManager {
        create_session_manager(&AppConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_refund_policy_question_only_searches_knowledge() {
        let manager = demo_manager().await;
        let reply = manager
            .handle_turn("thread-1", "What's your refund policy?")
            .await
            .unwrap();

        assert!(!reply.escalated);
        assert_eq!(reply.reason, None);
        let tools: Vec<&str> = reply.tool_calls.iter().map(|c| c.tool.as_str()).collect();
        assert_eq!(tools, vec!["search_knowledge_base"]);
        assert!(reply.response_text.contains("7 days"));
    }

    #[tokio::test]
    async fn test_human_request_escalates_and_stops_dispatch() {
        let manager = demo_manager().await;
        let reply = manager
            .handle_turn("thread-1", "I want to talk to a human")
            .await
            .unwrap();
        assert!(reply.escalated);
        assert_eq!(reply.reason, Some(EscalationReason::ExplicitRequest));

        let session = manager.session("thread-1").await.unwrap();
        assert!(session.is_escalated());
        assert_eq!(session.scratch_str(keys::ESCALATION_REASON), Some("explicit_request"));

        let next = manager
            .handle_turn("thread-1", "Show available experiences")
            .await
            .unwrap();
        assert!(next.escalated);
        assert!(next.tool_calls.is_empty());

        manager.clear_escalation("thread-1").await.unwrap();
        let resumed = manager
            .handle_turn("thread-1", "Show available experiences")
            .await
            .unwrap();
        assert!(!resumed.escalated);
        assert!(!resumed.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_refund_request_escalates_with_answer() {
        let manager = demo_manager().await;
        let reply = manager
            .handle_turn("thread-1", "I want a refund for this month")
            .await
            .unwrap();
        assert!(reply.escalated);
        assert_eq!(reply.reason, Some(EscalationReason::RefundRequest));
        assert!(reply.response_text.ends_with(HANDOFF_MESSAGE));
        assert!(reply.response_text.len() > HANDOFF_MESSAGE.len());
    }

    #[tokio::test]
    async fn test_blocked_account_escalates() {
        let manager = demo_manager().await;
        let reply = manager
            .handle_turn("thread-1", "Hi, I'm bruno@example.com and my account is acting up")
            .await
            .unwrap();
        assert!(reply.escalated);
        assert_eq!(reply.reason, Some(EscalationReason::BlockedAccount));
        let session = manager.session("thread-1").await.unwrap();
        assert_eq!(session.scratch_str(keys::USER_ID), Some("u-200"));
    }

    #[tokio::test]
    async fn test_three_failed_turns_escalate_on_fourth() {
        let manager = manager_with(&AppConfig::default(), Arc::new(DownKnowledge));

        for turn in 1..=3 {
            let reply = manager
                .handle_turn("thread-1", "what is the weather like")
                .await
                .unwrap();
            assert!(!reply.escalated, "turn {turn} escalated too early");
            assert!(reply.tool_calls.iter().all(|c| c.is_degraded()));
        }
        let session = manager.session("thread-1").await.unwrap();
        assert_eq!(session.consecutive_failures(), 3);

        let fourth = manager
            .handle_turn("thread-1", "what is the weather like")
            .await
            .unwrap();
        assert!(fourth.escalated);
        assert_eq!(fourth.reason, Some(EscalationReason::RepeatedFailure));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_cannot_resolve() {
        let mut cfg = AppConfig::default();
        cfg.dispatch.max_tool_calls = 1;
        let manager = create_session_manager(&cfg).await.unwrap();

        let reply = manager
            .handle_turn("thread-1", "Where is my booking? ana@example.com")
            .await
            .unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert!(reply.response_text.contains("could not resolve"));
        assert!(reply.recommend_escalation);
        assert!(!reply.escalated);
        assert_eq!(reply.reason, None);

        let session = manager.session("thread-1").await.unwrap();
        assert!(!session.is_escalated());
        let next = manager
            .handle_turn("thread-1", "What's your refund policy?")
            .await
            .unwrap();
        assert!(!next.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_small_talk_without_hits_does_not_escalate() {
        let manager = demo_manager().await;
        for text in ["hello", "thanks", "great"] {
            let reply = manager.handle_turn("thread-1", text).await.unwrap();
            assert!(!reply.escalated, "{text} escalated");
            assert!(reply.tool_calls.iter().all(|c| !c.is_degraded()));
        }
        let session = manager.session("thread-1").await.unwrap();
        assert_eq!(session.consecutive_failures(), 0);

        let fourth = manager
            .handle_turn("thread-1", "What's your refund policy?")
            .await
            .unwrap();
        assert!(!fourth.escalated);
        assert_eq!(fourth.reason, None);
        assert!(fourth.response_text.contains("7 days"));
    }

    #[tokio::test]
    async fn test_cancel_during_tool_call_commits_nothing() {
        let manager = Arc::new(manager_with(
            &AppConfig::default(),
            Arc::new(SlowKnowledge(Duration::from_millis(500))),
        ));
        manager.handle_turn("thread-1", "first question").await.unwrap();
        let before = manager.session("thread-1").await.unwrap();

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };
        let started = Instant::now();
        let err = manager
            .handle_turn_cancellable("thread-1", "second question", token)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, SupportError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_millis(500));

        let after = manager.session("thread-1").await.unwrap();
        assert_eq!(after.messages.len(), before.messages.len());
        assert_eq!(after.scratch, before.scratch);

        // 取消后租约已释放，同一 thread 可继续
        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            manager.handle_turn("thread-1", "third question"),
        )
        .await
        .expect("lease still held after cancel")
        .unwrap();
        assert!(!reply.tool_calls.is_empty());
        assert_eq!(manager.history("thread-1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_history_keeps_turn_order() {
        let manager = demo_manager().await;
        let inputs = ["hello", "What's your refund policy?", "Show available experiences"];
        for text in inputs {
            manager.handle_turn("thread-1", text).await.unwrap();
        }

        let history = manager.history("thread-1").await.unwrap();
        assert_eq!(history.len(), inputs.len() * 2);
        for (i, text) in inputs.iter().enumerate() {
            assert_eq!(history[2 * i].role, Role::User);
            assert_eq!(history[2 * i].content, *text);
            assert_eq!(history[2 * i + 1].role, Role::Assistant);
        }
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_distinct_threads_run_concurrently() {
        let delay = Duration::from_millis(300);
        let manager = Arc::new(manager_with(
            &AppConfig::default(),
            Arc::new(SlowKnowledge(delay)),
        ));

        let start = Instant::now();
        let turns = (0..4).map(|i| {
            let manager = Arc::clone(&manager);
            async move {
                manager
                    .handle_turn(&format!("thread-{i}"), "hello there")
                    .await
                    .unwrap()
            }
        });
        let replies = futures_util::future::join_all(turns).await;
        let elapsed = start.elapsed();

        assert_eq!(replies.len(), 4);
        assert!(elapsed < delay * 3, "threads blocked each other: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_same_thread_is_serialized() {
        let delay = Duration::from_millis(200);
        let manager = Arc::new(manager_with(
            &AppConfig::default(),
            Arc::new(SlowKnowledge(delay)),
        ));

        let start = Instant::now();
        let (a, b) = tokio::join!(
            manager.handle_turn("thread-1", "first question"),
            manager.handle_turn("thread-1", "second question"),
        );
        a.unwrap();
        b.unwrap();
        assert!(start.elapsed() >= delay * 2);

        let history = manager.history("thread-1").await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_llm_mode_answers_from_observation() {
        let mut cfg = AppConfig::default();
        cfg.dispatch.use_llm = true;
        cfg.llm.provider = "mock".into();
        let manager = create_session_manager(&cfg).await.unwrap();

        let reply = manager
            .handle_turn("thread-1", "What's your refund policy?")
            .await
            .unwrap();
        assert!(reply.metadata.llm_answered);
        assert!(reply.response_text.starts_with("Here is what I found:"));
        assert!(reply.response_text.contains("KB-002"));
    }

    #[tokio::test]
    async fn test_empty_message_asks_clarifying_question() {
        let manager = demo_manager().await;
        let reply = manager.handle_turn("thread-1", "").await.unwrap();
        assert!(reply.tool_calls.is_empty());
        assert!(!reply.escalated);
        assert!(reply.response_text.ends_with('?'));
    }
}
