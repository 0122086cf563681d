use elastic_apm_sync::{
    Agent, Config, ExportError, FinishedTransaction, RecordTransaction, Request, RequestContext,
    Response, SpanRecord,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockAgent {
    transactions: Mutex<Vec<FinishedTransaction>>,
}

impl Agent for MockAgent {
    fn put_transaction(&self, transaction: FinishedTransaction) {
        self.transactions.lock().unwrap().push(transaction);
    }

    fn send(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spans_stay_with_their_request() {
    let agent = Arc::new(MockAgent::default());
    let middleware = RecordTransaction::new(agent.clone(), Config::default());

    let mut handles = Vec::new();
    for i in 0..32u64 {
        let middleware = middleware.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let ctx = RequestContext::new();
            let request = Request::new("GET", format!("/items/{}", i));
            let spans = ctx.spans().clone();
            middleware
                .handle(&request, &ctx, move |_| {
                    for n in 0..=(i % 4) {
                        spans.push(SpanRecord::new(format!("request-{}-span-{}", i, n)));
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Ok::<_, ()>(Response::new(200))
                })
                .unwrap();
            middleware.terminate();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let transactions = agent.transactions.lock().unwrap();
    assert_eq!(transactions.len(), 32);
    for finished in transactions.iter() {
        let i: u64 = finished
            .name()
            .trim_start_matches("GET /items/")
            .parse()
            .unwrap();
        let spans = finished.spans();
        assert_eq!(spans.len() as u64, i % 4 + 1);
        for (n, span) in spans.iter().enumerate() {
            assert_eq!(span.name(), format!("request-{}-span-{}", i, n));
            assert_eq!(span.transaction_id(), finished.transaction().id);
        }
    }
}
