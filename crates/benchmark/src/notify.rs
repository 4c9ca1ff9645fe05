use llmbench_events::{
    emit_event, event_names, DownloadFailedEvent, DownloadProgressEvent, EventBus, EventBusRef,
};
use llmbench_models::SequentialCallbacks;
use std::sync::Arc;

/// Sequential download callbacks that publish progress, failure and
/// completion on `bus`.
pub fn download_callbacks(bus: EventBusRef) -> SequentialCallbacks {
    let progress_bus = Arc::clone(&bus);
    let complete_bus = Arc::clone(&bus);

    SequentialCallbacks {
        on_progress: Some(Arc::new(move |progress| {
            emit_event(
                progress_bus.as_ref(),
                event_names::DOWNLOAD_PROGRESS,
                &DownloadProgressEvent { progress },
            );
        })),
        on_complete: Some(Box::new(move || {
            complete_bus.emit(event_names::DOWNLOAD_COMPLETE, serde_json::Value::Null);
        })),
        on_error: Some(Box::new(move |model| {
            emit_event(
                bus.as_ref(),
                event_names::DOWNLOAD_FAILED,
                &DownloadFailedEvent {
                    model_name: model.model_name().to_string(),
                },
            );
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmbench_events::InMemoryEventBus;
    use llmbench_models::{DownloadController, ModelDirs, ModelDownloadState, ModelSource, OfflineTransfer, Selection};

    #[tokio::test(start_paused = true)]
    async fn test_failed_download_is_published() {
        let root = tempfile::tempdir().unwrap();
        let source =
            ModelSource::from_hugging_face_url("https://huggingface.co/o/m-GGUF/resolve/main/m.gguf")
                .unwrap();
        let model = ModelDownloadState::new(source, ModelDirs::new(root.path()), Arc::new(OfflineTransfer));
        model.set_selected(Selection::Benchmark, true);

        let bus = Arc::new(InMemoryEventBus::new());
        let controller =
            DownloadController::start(&[model], Selection::Benchmark, download_callbacks(bus.clone()));
        controller.join().await;

        let failed = bus.events_for(event_names::DOWNLOAD_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["model_name"], "m");
        assert!(bus.events_for(event_names::DOWNLOAD_COMPLETE).is_empty());
    }

    #[test]
    fn test_empty_selection_publishes_completion() {
        let bus = Arc::new(InMemoryEventBus::new());
        let _controller = DownloadController::start(&[], Selection::Chat, download_callbacks(bus.clone()));
        assert_eq!(bus.events_for(event_names::DOWNLOAD_COMPLETE).len(), 1);
    }
}
