mod common;

use std::collections::HashMap;
use std::sync::Arc;

use castcontrol::{
    CatalogResolver, Command, CommandHandler, ControlError, Resolution, Result, Track,
};

use common::*;

/// Links known in advance; anything else fails to resolve.
struct MapResolver {
    links: HashMap<String, (Vec<Track>, usize)>,
}

impl MapResolver {
    fn new() -> Self {
        Self {
            links: HashMap::new(),
        }
    }

    fn with(mut self, link: &str, tracks: Vec<Track>, failures: usize) -> Self {
        self.links.insert(link.to_string(), (tracks, failures));
        self
    }
}

impl CatalogResolver for MapResolver {
    fn resolve(&self, link: &str) -> Result<Resolution> {
        match self.links.get(link) {
            Some((tracks, failures)) => Ok(Resolution {
                tracks: tracks.clone(),
                failures: *failures,
            }),
            None => Err(ControlError::resolution_failed(link, "unknown link")),
        }
    }
}

fn handler(resolver: MapResolver) -> (CommandHandler, Arc<FakeDevice>) {
    let device = FakeDevice::new("Kitchen");
    let (controller, _) = controller_with(&[&device]);
    (CommandHandler::new(controller, Arc::new(resolver)), device)
}

#[test]
fn test_device_listing_and_selection() {
    let (handler, _device) = handler(MapResolver::new());

    let reply = handler.handle_line("/device");
    assert_eq!(reply.text, "Found 1 device(s):\n0. Kitchen");

    let reply = handler.handle_line("device 0");
    assert!(!reply.is_error());
    assert_eq!(reply.text, "Selected Kitchen");
    assert!(handler.handle_line("/devices").text.ends_with("Kitchen (selected)"));

    let reply = handler.handle_line("/device 5");
    assert!(reply.is_error());
    assert!(reply.text.contains("Invalid device index 5"));
}

#[test]
fn test_enqueue_starts_playback_and_reports_failures() {
    let resolver = MapResolver::new().with(
        "/music/mix.m3u",
        vec![track("A", 180_000), track("B", 200_000)],
        1,
    );
    let (handler, device) = handler(resolver);
    handler.execute(Command::SelectDevice(0));

    let reply = handler.handle_line("/music/mix.m3u");
    assert_eq!(
        reply.text,
        "Now playing: A (1 more queued)\n1 playlist entry(ies) skipped"
    );
    assert_eq!(device.loads(), vec![url("A")]);

    let reply = handler.handle_line("/queue");
    assert_eq!(reply.text, "Now playing:\nA\n\nUp next:\n1. B");

    let reply = handler.handle_line("/skip");
    assert_eq!(reply.text, "Now playing: B");
    assert_eq!(handler.handle_line("/skip").text, "Nothing left to play");
}

#[test]
fn test_late_skip_button_after_completion_is_ignored() {
    let resolver = MapResolver::new().with(
        "mix",
        vec![track("A", 180_000), track("B", 200_000), track("C", 60_000)],
        0,
    );
    let (handler, device) = handler(resolver);
    handler.handle_line("/device 0");

    let reply = handler.handle_line("mix");
    assert_eq!(reply.text, "Now playing: A (2 more queued)");
    let button = reply.skip_payload().unwrap();
    handler.controller().process_pending_events();

    // A finishes before the button press is handled.
    device.finish(&url("A"), 180_000);
    handler.controller().process_pending_events();
    assert_eq!(current_title(handler.controller()).as_deref(), Some("B"));

    let reply = handler.handle_line(&button);
    assert!(!reply.is_error());
    assert_eq!(reply.text, "That track already ended");
    assert_eq!(current_title(handler.controller()).as_deref(), Some("B"));
    assert_eq!(queued_titles(handler.controller()), vec!["C"]);
    assert_eq!(device.loads(), vec![url("A"), url("B")]);

    // A fresh button skips B.
    let current = handler.controller().now_playing();
    let reply = handler.handle_line(&format!("playbackControl skip {}", current.0));
    assert_eq!(reply.text, "Now playing: C");
    assert!(reply.skip_payload().is_some());
}

#[test]
fn test_enqueue_without_device_still_queues() {
    let resolver = MapResolver::new().with("mix", vec![track("A", 180_000)], 0);
    let (handler, _device) = handler(resolver);

    let reply = handler.handle_line("mix");
    assert!(!reply.is_error());
    assert!(reply.text.starts_with("Queued 1 track(s), but playback did not start"));
    assert_eq!(handler.controller().queue_view().pending, vec!["A"]);
}

#[test]
fn test_errors_become_replies() {
    let (handler, _device) = handler(MapResolver::new());

    let reply = handler.handle_line("http://nowhere/mix.m3u");
    assert!(reply.is_error());
    assert!(reply.text.contains("unknown link"));

    let reply = handler.handle_line("playbackControl stop");
    assert!(reply.is_error());
    assert!(reply.text.starts_with("No device selected"));

    let reply = handler.handle_line("playbackControl repeat");
    assert!(reply.is_error());

    let reply = handler.handle_line("/dance");
    assert!(reply.is_error());
    assert!(reply.text.contains("/help"));
}

#[test]
fn test_replies_are_bounded() {
    let tracks: Vec<Track> = (0..200)
        .map(|i| track(&format!("A rather long track title number {}", i), 1_000))
        .collect();
    let resolver = MapResolver::new().with("big", tracks, 0);
    let device = FakeDevice::new("Kitchen");
    let (controller, _) = controller_with(&[&device]);
    let handler = CommandHandler::new(controller, Arc::new(resolver)).with_max_message_length(300);

    handler.handle_line("/device 0");
    handler.handle_line("big");
    let reply = handler.handle_line("/queue");
    assert!(reply.text.chars().count() <= 300);
    assert!(reply.text.contains("more"));
}

#[test]
fn test_playback_buttons() {
    let resolver = MapResolver::new().with("mix", vec![track("A", 180_000)], 0);
    let (handler, device) = handler(resolver);
    handler.handle_line("/device 0");
    handler.handle_line("mix");

    assert!(!handler.handle_line("playbackControl playpause").is_error());
    assert!(!handler.handle_line("playbackControl volume_up").is_error());
    assert!(!handler.handle_line("playbackControl repeat").is_error());
    assert_eq!(handler.handle_line("/stop").text, "Stopped");

    let log = device.log();
    assert!(log.contains(&"pause".to_string()));
    assert!(log.contains(&"volume_up".to_string()));
    assert_eq!(log.last().map(String::as_str), Some("stop"));
    assert_eq!(device.loads(), vec![url("A"), url("A")]);
}
