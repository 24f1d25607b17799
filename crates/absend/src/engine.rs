use absen_core::{Embedding, FaceMesh, Frame, VisionError, VisionPipeline};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Embed {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Embedding, VisionError>>,
    },
    Landmarks {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Option<FaceMesh>, VisionError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode the image and embed its largest face.
    pub async fn embed(&self, image: Vec<u8>) -> Result<Embedding, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed { image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Decode the image and regress landmarks for its largest face.
    pub async fn landmarks(&self, image: Vec<u8>) -> Result<Option<FaceMesh>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Landmarks { image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Move the pipeline onto a dedicated OS thread and return a handle to it.
///
/// Decoding and inference are CPU-bound and blocking; keeping them on their
/// own thread leaves the async runtime free to accept requests.
pub fn spawn_engine(mut pipeline: VisionPipeline, queue_depth: usize) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("absen-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { image, reply } => {
                        let result = Frame::decode(&image)
                            .map_err(VisionError::from)
                            .and_then(|frame| pipeline.embed(&frame));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Landmarks { image, reply } => {
                        let result = Frame::decode(&image)
                            .map_err(VisionError::from)
                            .and_then(|frame| pipeline.landmarks(&frame));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_embed_roundtrip_through_thread() {
        let engine = scripted_engine(&[(1, vec![3.0, 4.0])], &[]);
        let e = engine.embed(image_with_marker(1)).await.unwrap();
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embed_errors() {
        let engine = scripted_engine(&[], &[]);
        let no_face = engine.embed(image_with_marker(NO_FACE)).await;
        assert!(matches!(no_face, Err(EngineError::Vision(VisionError::NoFaceDetected))));

        let garbage = engine.embed(b"not an image".to_vec()).await;
        assert!(matches!(garbage, Err(EngineError::Vision(VisionError::Frame(_)))));
    }

    #[tokio::test]
    async fn test_landmarks_absent_face() {
        let engine = scripted_engine(&[], &[(2, FaceMesh::new(vec![(0.5, 0.5)]))]);
        assert!(engine.landmarks(image_with_marker(NO_FACE)).await.unwrap().is_none());
        let mesh = engine.landmarks(image_with_marker(2)).await.unwrap().unwrap();
        assert_eq!(mesh.point(0), Some((0.5, 0.5)));
    }
}
