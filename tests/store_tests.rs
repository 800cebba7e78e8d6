// Integration tests for the SQLite knowledge store
//
// These tests cover the session lifecycle, participant presence windows,
// delivery receipts, snippet upserts with full-text search, and the
// prompt-augmentation helpers layered on top of search.

use anyhow::Result;
use chrono::Utc;
use class_scribe::store::{
    augment_prompt, knowledge_context, KnowledgeStore, SOURCE_VOICE_SESSION,
};
use serde_json::json;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> Result<KnowledgeStore> {
    Ok(KnowledgeStore::new(dir.path().join("class-scribe.sqlite"))?)
}

#[test]
fn test_session_lifecycle_create_and_close() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    // Setup: open a session with initiator and topic
    let session = store.create_session("guild-1", "room-1", Some("teacher-1"), Some("Fractions"))?;
    assert!(session.id > 0);
    assert_eq!(session.guild_id, "guild-1");
    assert_eq!(session.channel_id, "room-1");
    assert_eq!(session.initiator_id.as_deref(), Some("teacher-1"));
    assert_eq!(session.topic.as_deref(), Some("Fractions"));
    assert!(session.ended_at.is_none(), "New session should be open");
    assert_eq!(session.metadata["started_by"], json!("teacher-1"));

    // Close it with artifacts
    let ended_at = Utc::now();
    let metadata = json!({ "started_by": "teacher-1", "reason": "manual" });
    let closed = store
        .close_session(
            session.id,
            ended_at,
            Some("Covered halves and quarters."),
            Some("Teacher: today we cover fractions"),
            &metadata,
        )?
        .expect("closed session should exist");

    // Verify: artifacts and close time are stored
    assert_eq!(closed.ended_at, Some(ended_at));
    assert_eq!(closed.summary.as_deref(), Some("Covered halves and quarters."));
    assert_eq!(
        closed.transcript.as_deref(),
        Some("Teacher: today we cover fractions")
    );
    assert_eq!(closed.metadata["reason"], json!("manual"));

    let fetched = store.get_session(session.id)?.expect("session should exist");
    assert_eq!(fetched.ended_at, Some(ended_at));
    assert_eq!(fetched.summary, closed.summary);

    Ok(())
}

#[test]
fn test_close_session_is_one_shot() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let session = store.create_session("guild-1", "room-1", None, None)?;

    let first_end = Utc::now();
    let first = store
        .close_session(
            session.id,
            first_end,
            Some("first summary"),
            Some("first transcript"),
            &json!({}),
        )?
        .expect("first close should return the row");

    // A second close must not overwrite the stored artifacts
    let second = store
        .close_session(
            session.id,
            Utc::now(),
            Some("second summary"),
            Some("second transcript"),
            &json!({ "reason": "late" }),
        )?
        .expect("second close should still find the row");

    assert_eq!(second.summary.as_deref(), Some("first summary"));
    assert_eq!(second.transcript.as_deref(), Some("first transcript"));
    assert_eq!(second.ended_at, first.ended_at, "Close time should not move");

    Ok(())
}

#[test]
fn test_get_session_unknown_returns_none() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    assert!(store.get_session(9999)?.is_none());

    Ok(())
}

#[test]
fn test_latest_session_per_channel() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    let s1 = store.create_session("guild-1", "room-a", None, None)?;
    let _s2 = store.create_session("guild-1", "room-b", None, None)?;
    let s3 = store.create_session("guild-1", "room-a", None, None)?;

    // Verify: the newest session for room-a wins
    let latest = store
        .latest_session_for_channel("guild-1", "room-a")?
        .expect("room-a should have sessions");
    assert_eq!(latest.id, s3.id);
    assert_ne!(latest.id, s1.id);

    assert!(store
        .latest_session_for_channel("guild-1", "room-c")?
        .is_none());

    Ok(())
}

#[test]
fn test_list_sessions_orders_newest_first() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    let s1 = store.create_session("guild-1", "room-a", None, None)?;
    let s2 = store.create_session("guild-1", "room-b", None, None)?;
    let s3 = store.create_session("guild-1", "room-a", None, None)?;
    let _other = store.create_session("guild-2", "room-x", None, None)?;

    let all = store.list_sessions("guild-1", 10)?;
    assert_eq!(
        all.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![s3.id, s2.id, s1.id],
        "Sessions should come back newest first"
    );

    let limited = store.list_sessions("guild-1", 2)?;
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, s3.id);

    assert!(store.list_sessions("guild-3", 10)?.is_empty());

    Ok(())
}

#[test]
fn test_participant_windows_open_close_rejoin() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let session = store.create_session("guild-1", "room-1", None, None)?;

    // First join opens a window; a duplicate join is a no-op
    store.add_participant(session.id, "alice")?;
    store.add_participant(session.id, "alice")?;
    let rows = store.list_participants(session.id)?;
    assert_eq!(rows.len(), 1, "Duplicate join should not open a second row");
    assert!(rows[0].left_at.is_none());

    // Leaving closes the window
    store.mark_participant_left(session.id, "alice")?;
    let rows = store.list_participants(session.id)?;
    assert!(rows[0].left_at.is_some(), "Leave should close the window");

    // Rejoining opens a fresh window and keeps the closed one
    store.add_participant(session.id, "alice")?;
    let rows = store.list_participants(session.id)?;
    assert_eq!(rows.len(), 2, "Rejoin should open a second row");
    assert!(rows[0].left_at.is_some());
    assert!(rows[1].left_at.is_none());
    assert_eq!(rows[1].user_id, "alice");

    Ok(())
}

#[test]
fn test_close_open_participants_sweeps_only_open_windows() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let session = store.create_session("guild-1", "room-1", None, None)?;

    store.add_participant(session.id, "alice")?;
    store.add_participant(session.id, "bob")?;
    store.mark_participant_left(session.id, "alice")?;
    let alice_left = store.list_participants(session.id)?[0].left_at;

    let swept_at = Utc::now();
    let swept = store.close_open_participants(session.id, swept_at)?;
    assert_eq!(swept, 1, "Only bob's window should still be open");

    let rows = store.list_participants(session.id)?;
    assert_eq!(rows[0].left_at, alice_left, "Closed window must not move");
    assert_eq!(rows[1].left_at, Some(swept_at));

    Ok(())
}

#[test]
fn test_snippet_upsert_keeps_identity() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    let first_id = store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        77,
        Some("Geography"),
        None,
        "Reviewed the water cycle and evaporation",
    )?;
    let first = &store.search("guild-1", "evaporation", 5)?[0];
    let original_created = first.created_at;

    // Re-indexing the same source replaces the text but keeps the row
    let second_id = store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        77,
        Some("Geography week 2"),
        Some("Condensation recap"),
        "Discussed condensation and precipitation stages",
    )?;
    assert_eq!(second_id, first_id, "Upsert should keep the snippet id");

    assert!(
        store.search("guild-1", "evaporation", 5)?.is_empty(),
        "Old content should no longer match"
    );
    let updated = &store.search("guild-1", "precipitation", 5)?[0];
    assert_eq!(updated.id, first_id);
    assert_eq!(updated.title.as_deref(), Some("Geography week 2"));
    assert_eq!(updated.summary.as_deref(), Some("Condensation recap"));
    assert_eq!(
        updated.created_at, original_created,
        "Creation time should survive the update"
    );

    Ok(())
}

#[test]
fn test_search_filters_guild_and_orders_newest_first() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    let a = store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        1,
        None,
        None,
        "Quadratic equations homework review",
    )?;
    let b = store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        2,
        None,
        None,
        "Linear equations and graphing homework",
    )?;
    let c = store.upsert_snippet(
        "guild-2",
        SOURCE_VOICE_SESSION,
        3,
        None,
        None,
        "Balancing chemistry homework problems",
    )?;

    let hits = store.search("guild-1", "homework", 5)?;
    assert_eq!(
        hits.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![b, a],
        "Matches should be scoped to the guild, newest first"
    );

    let limited = store.search("guild-1", "homework", 1)?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, b);

    let other = store.search("guild-2", "homework", 5)?;
    assert_eq!(other.iter().map(|s| s.id).collect::<Vec<_>>(), vec![c]);

    Ok(())
}

#[test]
fn test_search_matches_summary_but_not_title() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        10,
        Some("Astronomy"),
        Some("Volcano eruption basics"),
        "Notes from the afternoon group",
    )?;

    assert_eq!(
        store.search("guild-1", "volcano", 5)?.len(),
        1,
        "Summary text should be indexed"
    );
    assert!(
        store.search("guild-1", "astronomy", 5)?.is_empty(),
        "Title text is not part of the index"
    );

    Ok(())
}

#[test]
fn test_search_sanitizes_punctuation() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        20,
        None,
        None,
        "Solving equations with two and three unknowns",
    )?;

    // Queries with operator characters must not break the match expression
    assert_eq!(store.search("guild-1", "equations?!", 5)?.len(), 1);
    assert_eq!(store.search("guild-1", "\"equations\"", 5)?.len(), 1);
    assert_eq!(store.search("guild-1", "equations AND unknowns", 5)?.len(), 1);

    // Queries with nothing indexable return nothing instead of erroring
    assert!(store.search("guild-1", "--- !!! ...", 5)?.is_empty());
    assert!(store.search("guild-1", "", 5)?.is_empty());

    Ok(())
}

#[test]
fn test_delivery_receipts_upsert() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let session = store.create_session("guild-1", "room-1", None, None)?;

    store.record_delivery(session.id, "alice", Some("summary-bot"))?;
    store.record_delivery(session.id, "alice", Some("teacher-1"))?;
    store.record_delivery(session.id, "bob", None)?;

    let rows = store.list_deliveries(session.id)?;
    assert_eq!(rows.len(), 2, "Re-delivery should update, not duplicate");
    assert_eq!(rows[0].user_id, "alice");
    assert_eq!(
        rows[0].delivered_by.as_deref(),
        Some("teacher-1"),
        "Latest deliverer should win"
    );
    assert_eq!(rows[1].user_id, "bob");
    assert!(rows[1].delivered_by.is_none());

    Ok(())
}

#[test]
fn test_touch_broadcast_stamps_session() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;
    let session = store.create_session("guild-1", "room-1", None, None)?;
    assert!(session.last_broadcast_at.is_none());

    let at = Utc::now();
    store.touch_broadcast(session.id, at)?;

    let fetched = store.get_session(session.id)?.expect("session should exist");
    assert_eq!(fetched.last_broadcast_at, Some(at));

    Ok(())
}

#[test]
fn test_knowledge_context_renders_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        30,
        Some("Biology week 3"),
        Some("Photosynthesis converts light into chemical energy"),
        "Full transcript text here",
    )?;

    let context = knowledge_context(&store, "guild-1", "photosynthesis energy", 3);
    assert!(context.starts_with("Entry 1 ("), "Got: {}", context);
    assert!(context.contains(") - Biology week 3\n"));
    assert!(context.contains("Photosynthesis converts light into chemical energy"));

    // Verify: degenerate inputs produce no context
    assert!(knowledge_context(&store, "guild-1", "ph", 3).is_empty());
    assert!(knowledge_context(&store, "", "photosynthesis", 3).is_empty());
    assert!(knowledge_context(&store, "guild-1", "unrelated topic", 3).is_empty());

    Ok(())
}

#[test]
fn test_knowledge_context_query_floor_counts_characters() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        32,
        Some("Exchange visit"),
        None,
        "日本 東京都 exchange visit logistics",
    )?;

    // Two characters stay under the floor even at six UTF-8 bytes
    assert!(knowledge_context(&store, "guild-1", "日本", 3).is_empty());
    // Three characters clear it regardless of byte width
    let context = knowledge_context(&store, "guild-1", "東京都", 3);
    assert!(context.contains(") - Exchange visit\n"), "Got: {}", context);

    Ok(())
}

#[test]
fn test_knowledge_context_previews_content_without_summary() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    // No summary and no title: body falls back to a bounded content preview
    let content = "glaciers carve valleys over time ".repeat(20);
    store.upsert_snippet("guild-1", SOURCE_VOICE_SESSION, 31, None, None, &content)?;

    let context = knowledge_context(&store, "guild-1", "glaciers", 3);
    assert!(context.contains(") - Untitled\n"));
    let body = context
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    assert_eq!(body.chars().count(), 280, "Preview should be capped");

    Ok(())
}

#[test]
fn test_augment_prompt_prefixes_matching_context() -> Result<()> {
    let dir = TempDir::new()?;
    let store = open_store(&dir)?;

    store.upsert_snippet(
        "guild-1",
        SOURCE_VOICE_SESSION,
        40,
        Some("History"),
        Some("The printing press spread literacy across Europe"),
        "Transcript of the history session",
    )?;

    let base = "What did we say about the printing press?";
    let augmented = augment_prompt(&store, "guild-1", base, None, 3);
    assert!(
        augmented.starts_with("Use the knowledge entries below when relevant."),
        "Got: {}",
        augmented
    );
    assert!(augmented.contains("Knowledge entries:\nEntry 1 ("));
    assert!(augmented.ends_with(&format!("User question/context:\n{}", base)));

    // No match: the prompt passes through untouched
    let untouched = augment_prompt(&store, "guild-1", "Tell me about sailing", None, 3);
    assert_eq!(untouched, "Tell me about sailing");

    // An explicit search text drives retrieval instead of the prompt
    let via_search = augment_prompt(
        &store,
        "guild-1",
        "Summarize recent classes",
        Some("printing press literacy"),
        3,
    );
    assert!(via_search.contains("Knowledge entries:"));

    Ok(())
}
