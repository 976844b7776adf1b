//! End-to-end decode tests against an instrumented fake model

mod common;

use std::sync::Arc;

use common::{FakeModel, Script, A, HELLO, OP, ST, THERE, VOCAB_SIZE};
use futures::StreamExt;
use spindle_core::{
    CoreError, DecodeEngine, DecodeStream, FinishReason, GenerationOutput, GenerationRequest,
    SamplingConfig,
};
use tokio_util::sync::CancellationToken;

fn greedy(max_new_tokens: usize) -> SamplingConfig {
    SamplingConfig {
        max_new_tokens,
        temperature: 0.0,
        ..Default::default()
    }
}

fn engine(model: FakeModel) -> (DecodeEngine<FakeModel>, Arc<FakeModel>) {
    common::init_tracing();
    let model = Arc::new(model);
    (DecodeEngine::new(Arc::clone(&model), common::tokenizer()), model)
}

async fn drain(stream: &mut DecodeStream<FakeModel>) -> Vec<GenerationOutput> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.unwrap());
    }
    events
}

fn texts(events: &[GenerationOutput]) -> Vec<String> {
    events.iter().map(|e| e.outputs[0].text.clone()).collect()
}

#[tokio::test]
async fn test_length_termination() {
    let (engine, model) = engine(FakeModel::repeating(A));
    let request = GenerationRequest::builder(vec![5, 9])
        .request_id("req-len")
        .sampling(greedy(3))
        .build()
        .unwrap();

    let mut stream = engine.decode(request).unwrap();
    let events = drain(&mut stream).await;

    assert_eq!(texts(&events), vec!["A", "AA", "AAA", "AAA"]);
    for event in &events[..3] {
        assert!(!event.finished);
        assert_eq!(event.finish_reason(), None);
    }

    let last = &events[3];
    assert!(last.finished);
    assert_eq!(last.finish_reason(), Some(FinishReason::Length));
    assert_eq!(last.outputs[0].token_ids, vec![A, A, A]);
    assert_eq!(last.prompt_token_ids, vec![5, 9]);
    assert_eq!(last.request_id, "req-len");

    // Prefill sees the whole prompt, every later call only the newest token.
    assert_eq!(model.inputs(), vec![vec![5, 9], vec![A], vec![A]]);
    assert_eq!(model.live_caches(), 0);
    assert!(stream.is_finished());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stop_termination_excludes_stop_text() {
    let (engine, model) = engine(FakeModel::new(Script::Tokens(vec![HELLO, ST, OP, THERE])));
    let request = GenerationRequest::builder(vec![3])
        .sampling(greedy(10))
        .stop(["STOP"])
        .build()
        .unwrap();

    let events = drain(&mut engine.decode(request).unwrap()).await;

    // "Hello ST" is withheld: it could still become the stop string.
    assert_eq!(texts(&events), vec!["Hello", "Hello ", "Hello "]);
    let last = events.last().unwrap();
    assert!(last.finished);
    assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(last.outputs[0].token_ids, vec![HELLO, ST, OP]);
    assert!(events.iter().all(|e| !e.outputs[0].text.contains("ST")));
    assert_eq!(model.forward_calls(), 3);
    assert_eq!(model.live_caches(), 0);
}

#[tokio::test]
async fn test_withheld_prefix_released_when_stop_does_not_complete() {
    let (engine, _model) = engine(FakeModel::new(Script::Tokens(vec![ST, THERE])));
    let request = GenerationRequest::builder(vec![3])
        .sampling(greedy(2))
        .stop(["STOP"])
        .build()
        .unwrap();

    let events = drain(&mut engine.decode(request).unwrap()).await;

    assert_eq!(texts(&events), vec!["ST there", "ST there"]);
    assert_eq!(events[1].finish_reason(), Some(FinishReason::Length));
}

#[tokio::test]
async fn test_empty_stop_behaves_as_no_stop() {
    let (engine, _model) = engine(FakeModel::repeating(A));
    let with_empty = GenerationRequest::builder(vec![5, 9])
        .sampling(greedy(2))
        .stop([""])
        .build()
        .unwrap();
    let without = GenerationRequest::builder(vec![5, 9])
        .sampling(greedy(2))
        .build()
        .unwrap();

    let a = drain(&mut engine.decode(with_empty).unwrap()).await;
    let b = drain(&mut engine.decode(without).unwrap()).await;

    assert_eq!(texts(&a), texts(&b));
    assert_eq!(a.last().unwrap().finish_reason(), Some(FinishReason::Length));
}

#[tokio::test]
async fn test_zero_max_new_tokens() {
    let (engine, model) = engine(FakeModel::repeating(A));
    let request = GenerationRequest::builder(vec![5])
        .sampling(greedy(0))
        .build()
        .unwrap();

    let events = drain(&mut engine.decode(request).unwrap()).await;

    assert_eq!(events.len(), 1);
    assert!(events[0].finished);
    assert_eq!(events[0].outputs[0].text, "");
    assert_eq!(events[0].finish_reason(), Some(FinishReason::Length));
    assert_eq!(model.forward_calls(), 0);
}

#[tokio::test]
async fn test_greedy_is_deterministic() {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let (engine, _model) = engine(FakeModel::new(Script::Noise));
        let request = GenerationRequest::builder(vec![1, 2, 3])
            .sampling(greedy(8))
            .build()
            .unwrap();
        runs.push(engine.decode(request).unwrap().collect_final().await.unwrap());
    }

    assert_eq!(runs[0].outputs[0].token_ids, runs[1].outputs[0].token_ids);
    assert_eq!(runs[0].outputs[0].text, runs[1].outputs[0].text);
}

#[tokio::test]
async fn test_seeded_sampling_is_reproducible() {
    let sampling = SamplingConfig {
        max_new_tokens: 8,
        temperature: 0.9,
        top_k: 20,
        top_p: 0.95,
        seed: Some(1234),
        ..Default::default()
    };

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (engine, _model) = engine(FakeModel::new(Script::Noise));
        let request = GenerationRequest::builder(vec![1, 2, 3])
            .sampling(sampling.clone())
            .build()
            .unwrap();
        runs.push(engine.decode(request).unwrap().collect_final().await.unwrap());
    }

    assert_eq!(runs[0].outputs[0].token_ids, runs[1].outputs[0].token_ids);
    assert_eq!(runs[0].outputs[0].token_ids.len(), 8);
    assert!(runs[0].outputs[0].cumulative_logprob <= 0.0);
}

#[tokio::test]
async fn test_repetition_penalty_uses_full_history() {
    let mut logits = vec![0.0; VOCAB_SIZE];
    logits[A as usize] = 2.0;
    logits[7] = 1.9;

    let run = |penalty: f32| {
        let logits = logits.clone();
        async move {
            let (engine, _model) = engine(FakeModel::new(Script::Fixed(logits)));
            let request = GenerationRequest::builder(vec![5, 9])
                .sampling(SamplingConfig {
                    repetition_penalty: penalty,
                    ..greedy(3)
                })
                .build()
                .unwrap();
            engine.decode(request).unwrap().collect_final().await.unwrap()
        }
    };

    assert_eq!(run(1.0).await.outputs[0].token_ids, vec![A, A, A]);
    assert_eq!(run(2.0).await.outputs[0].token_ids, vec![A, 7, A]);
}

#[tokio::test]
async fn test_model_failure_releases_cache() {
    let (engine, model) = engine(FakeModel::repeating(A).failing_on(2));
    let request = GenerationRequest::builder(vec![5, 9])
        .sampling(greedy(5))
        .build()
        .unwrap();

    let mut stream = engine.decode(request).unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().outputs[0].text, "A");
    assert_eq!(stream.next().await.unwrap().unwrap().outputs[0].text, "AA");
    assert!(stream.holds_cache());

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), "FAKE_FORWARD_FAILED");
    match err {
        CoreError::Model { step, .. } => assert_eq!(step, Some(2)),
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(model.live_caches(), 0);
    assert!(!stream.holds_cache());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_prefill_failure() {
    let (engine, model) = engine(FakeModel::repeating(A).failing_on(0));
    let request = GenerationRequest::builder(vec![5])
        .sampling(greedy(4))
        .build()
        .unwrap();

    let err = engine.decode(request).unwrap().collect_final().await.unwrap_err();
    assert_eq!(err.code(), "FAKE_FORWARD_FAILED");
    assert_eq!(model.live_caches(), 0);
}

#[tokio::test]
async fn test_cancellation_between_steps() {
    let (engine, model) = engine(FakeModel::repeating(A));
    let request = GenerationRequest::builder(vec![5, 9])
        .sampling(greedy(10))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    let mut stream = engine.decode_with_cancel(request, cancel.clone()).unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    assert_eq!(model.live_caches(), 1);

    cancel.cancel();
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(model.live_caches(), 0);
    assert_eq!(model.forward_calls(), 1);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_cancelled_before_prefill() {
    let (engine, model) = engine(FakeModel::repeating(A));
    let request = GenerationRequest::builder(vec![5])
        .sampling(greedy(4))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .decode_with_cancel(request, cancel)
        .unwrap()
        .collect_final()
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(model.forward_calls(), 0);
}

#[tokio::test]
async fn test_early_drop_releases_cache() {
    let (engine, model) = engine(FakeModel::repeating(A));
    let request = GenerationRequest::builder(vec![5, 9])
        .sampling(greedy(10))
        .build()
        .unwrap();

    let mut stream = engine.decode(request).unwrap();
    stream.next().await.unwrap().unwrap();
    stream.next().await.unwrap().unwrap();
    assert_eq!(model.live_caches(), 1);

    drop(stream);
    assert_eq!(model.live_caches(), 0);
    assert_eq!(model.forward_calls(), 2);
}

#[tokio::test]
async fn test_stream_adapter_and_concurrent_requests() {
    let (engine, model) = engine(FakeModel::repeating(A));

    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let request = GenerationRequest::builder(vec![5, 9])
                .request_id(format!("req-{i}"))
                .sampling(greedy(3))
                .build()
                .unwrap();
            engine
                .decode(request)
                .unwrap()
                .into_stream()
                .collect::<Vec<_>>()
                .await
        }));
    }

    for handle in handles {
        let events = handle.await.unwrap();
        assert_eq!(events.len(), 4);
        let last = events.last().unwrap().as_ref().unwrap();
        assert_eq!(last.outputs[0].text, "AAA");
        assert!(last.finished);
    }
    assert_eq!(model.live_caches(), 0);
}
