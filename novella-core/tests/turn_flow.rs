//! End-to-end turn protocol tests over scripted generators.

use novella_core::testing::{
    lost_ending_check, one_choice_draft, sample_frame, two_choice_draft, TestHarness,
};
use novella_core::{GenerationError, Phase, StoryFrame, TurnError};

#[tokio::test]
async fn test_start_creates_frame_and_first_scene() {
    let harness = TestHarness::new();
    harness.scenes.queue(two_choice_draft("An overgrown trailhead."));

    let outcome = harness.start().await.unwrap();
    let scene = outcome.as_scene().expect("start should yield a scene");
    assert_eq!(scene.choices.len(), 2);
    assert!(scene.image.is_some());
    assert!(scene.music.is_some());

    let state = harness.state().await;
    assert_eq!(state.phase(), Phase::InProgress);
    assert!(state.story_frame.is_some());
    assert_eq!(state.current_scene_id, Some(scene.scene_id));
    assert_eq!(state.scenes.len(), 1);
    assert!(state.user_choices.is_empty());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let harness = TestHarness::new();
    harness.start().await.unwrap();

    let err = harness.start().await.unwrap_err();
    assert!(matches!(err, TurnError::Precondition(_)));

    // The first scene is still the current one.
    let state = harness.state().await;
    assert_eq!(state.scenes.len(), 1);
}

#[tokio::test]
async fn test_choose_before_start_is_rejected() {
    let harness = TestHarness::new();
    let err = harness.choose("open the door").await.unwrap_err();
    assert!(matches!(err, TurnError::Precondition(_)));
    assert_eq!(harness.phase().await, Phase::AwaitingStart);
}

#[tokio::test]
async fn test_empty_choice_is_rejected() {
    let harness = TestHarness::new();
    harness.start().await.unwrap();

    let err = harness.choose("   ").await.unwrap_err();
    assert!(matches!(err, TurnError::Precondition(_)));
}

#[tokio::test]
async fn test_choice_advances_history_and_scene() {
    let harness = TestHarness::new();
    harness.scenes.queue(two_choice_draft("An overgrown trailhead."));
    harness.scenes.queue(two_choice_draft("A clearing, silent."));

    harness.start().await.unwrap();
    let first_id = harness.state().await.current_scene_id.unwrap();

    let outcome = harness.choose("Press on").await.unwrap();
    let scene = outcome.as_scene().unwrap();
    assert_eq!(scene.description, "A clearing, silent.");

    let state = harness.state().await;
    assert_eq!(state.user_choices.len(), 1);
    assert_eq!(state.user_choices[0].scene_id, first_id);
    assert_eq!(state.user_choices[0].choice_text, "Press on");
    assert_eq!(state.current_scene_id, Some(scene.scene_id));
    assert_eq!(state.scenes.len(), 2);
}

#[tokio::test]
async fn test_short_draft_retries_once_then_fails() {
    let harness = TestHarness::new();
    harness.start().await.unwrap();
    let before = harness.state().await;

    let calls_before = harness.scenes.calls();
    harness.scenes.queue(one_choice_draft("A locked gate."));
    harness.scenes.queue(one_choice_draft("Still a locked gate."));

    let err = harness.choose("Press on").await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Generation(GenerationError::TooFewChoices { got: 1 })
    ));
    // Exactly one retry.
    assert_eq!(harness.scenes.calls() - calls_before, 2);

    // The failed turn committed nothing.
    let after = harness.state().await;
    assert_eq!(after.user_choices.len(), before.user_choices.len());
    assert_eq!(after.scenes.len(), before.scenes.len());
    assert_eq!(after.current_scene_id, before.current_scene_id);
}

#[tokio::test]
async fn test_short_draft_recovers_on_retry() {
    let harness = TestHarness::new();
    harness.start().await.unwrap();

    harness.scenes.queue(one_choice_draft("A locked gate."));
    harness.scenes.queue(two_choice_draft("The gate creaks open."));

    let outcome = harness.choose("Press on").await.unwrap();
    let scene = outcome.as_scene().unwrap();
    assert_eq!(scene.description, "The gate creaks open.");
    assert_eq!(scene.choices.len(), 2);
}

#[tokio::test]
async fn test_ending_finishes_the_story() {
    let harness = TestHarness::new();
    harness.start().await.unwrap();
    assert!(harness.music.is_active(&harness.key).await);

    harness.endings.queue(lost_ending_check());
    let outcome = harness.choose("Wander off the path").await.unwrap();
    assert!(outcome.game_over());

    let payload = outcome.as_ending().unwrap();
    assert_eq!(payload.ending.id, "lost");
    assert!(payload.image.is_some());

    let state = harness.state().await;
    assert_eq!(state.phase(), Phase::Ended);
    assert_eq!(state.user_choices.len(), 1);
    // The ending turn records the choice but adds no scene.
    assert_eq!(state.scenes.len(), 1);

    // The music stream is torn down with the story.
    assert!(!harness.music.is_active(&harness.key).await);
}

#[tokio::test]
async fn test_choose_after_ending_is_rejected_and_state_untouched() {
    let harness = TestHarness::new();
    harness.start().await.unwrap();
    harness.endings.queue(lost_ending_check());
    harness.choose("Wander off the path").await.unwrap();

    let before = harness.state().await;
    let err = harness.choose("Keep going anyway").await.unwrap_err();
    assert!(matches!(err, TurnError::Precondition(_)));

    let after = harness.state().await;
    assert_eq!(after.user_choices.len(), before.user_choices.len());
    assert_eq!(after.ending.as_ref().map(|e| &e.id), Some(&"lost".to_string()));
}

#[tokio::test]
async fn test_reset_returns_session_to_awaiting_start() {
    let harness = TestHarness::new();
    harness.start().await.unwrap();
    harness.choose("Press on").await.unwrap();

    harness.reset().await.unwrap();

    let state = harness.state().await;
    assert_eq!(state.phase(), Phase::AwaitingStart);
    assert!(state.story_frame.is_none());
    assert!(state.scenes.is_empty());
    assert!(state.user_choices.is_empty());
    assert!(!harness.music.is_active(&harness.key).await);

    // Reset is idempotent, and the session can start over.
    harness.reset().await.unwrap();
    harness.start().await.unwrap();
    assert_eq!(harness.phase().await, Phase::InProgress);
}

#[tokio::test]
async fn test_frame_without_endings_fails_start() {
    let mut frame = sample_frame();
    frame.endings.clear();
    let harness = TestHarness::with_frame(frame);

    let err = harness.start().await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Generation(GenerationError::NoEndings)
    ));
    // Nothing was committed.
    assert_eq!(harness.phase().await, Phase::AwaitingStart);
}

#[tokio::test]
async fn test_extra_choices_are_truncated_to_two() {
    let mut draft = two_choice_draft("A fork in the path.");
    let mut third = draft.choices[0].clone();
    third.text = "Climb a tree".to_string();
    draft.choices.push(third);

    let harness = TestHarness::new();
    harness.scenes.queue(draft);

    let outcome = harness.start().await.unwrap();
    assert_eq!(outcome.as_scene().unwrap().choices.len(), 2);
}

#[tokio::test]
async fn test_full_playthrough() {
    let harness = TestHarness::new();
    harness.scenes.queue(two_choice_draft("An overgrown trailhead."));

    harness.start().await.unwrap();
    harness.choose("Press on").await.unwrap();
    harness.choose("Turn back").await.unwrap();

    harness.endings.queue(lost_ending_check());
    let outcome = harness.choose("Sit down and wait").await.unwrap();
    assert!(outcome.game_over());

    let state = harness.state().await;
    assert_eq!(state.user_choices.len(), 3);
    assert_eq!(state.scenes.len(), 3);
    let frame: &StoryFrame = state.story_frame.as_ref().unwrap();
    assert_eq!(frame.setting, "dark forest");
}
