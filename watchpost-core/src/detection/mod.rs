//! detection — engine output schema and detection decoding
//!
//! Detector models exported from torchvision return `(losses, detections)`
//! where `detections` is a one-element list holding a string-keyed map of
//! tensors (`"boxes"`, `"scores"`, `"labels"`). That dynamically shaped value
//! is parsed here, once, into an [`AnalysisResult`]; nothing past the decoder
//! sees an [`EngineValue`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::PipelineError;

// ── Engine output ────────────────────────────────────────────────────────────

/// Dense `f32` tensor returned by the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl EngineTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    /// One-dimensional tensor over `data`.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }
}

/// Heterogeneous value produced by an inference engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    Tensor(EngineTensor),
    List(Vec<EngineValue>),
    Tuple(Vec<EngineValue>),
    Dict(BTreeMap<String, EngineValue>),
}

impl EngineValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Tensor(_) => "tensor",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
        }
    }

    /// `(losses, [detections])` with an empty loss map.
    pub fn detection_output(detections: BTreeMap<String, EngineValue>) -> Self {
        Self::Tuple(vec![
            Self::Dict(BTreeMap::new()),
            Self::List(vec![Self::Dict(detections)]),
        ])
    }
}

// ── Decoded types ────────────────────────────────────────────────────────────

/// A single hit in tensor-space coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub score: f32,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// Value handed from the worker to the render context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisResult {
    /// Flat `x0, y0, x1, y1` quadruples, engine order.
    pub boxes: Vec<f32>,
    pub scores: Vec<f32>,
    pub forward_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl AnalysisResult {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn detection(&self, i: usize) -> Option<Detection> {
        let score = *self.scores.get(i)?;
        let b = self.boxes.get(4 * i..4 * i + 4)?;
        Some(Detection {
            score,
            x0: b[0],
            y0: b[1],
            x1: b[2],
            y1: b[3],
        })
    }

    pub fn detections(&self) -> impl Iterator<Item = Detection> + '_ {
        (0..self.len()).filter_map(|i| self.detection(i))
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

const BOXES_KEY: &str = "boxes";
const SCORES_KEY: &str = "scores";

/// Parses engine output and keeps the first few hits for bookkeeping.
#[derive(Debug)]
pub struct DetectionDecoder {
    tracked: Vec<Detection>,
    tracked_cap: usize,
}

impl DetectionDecoder {
    pub fn new(tracked_cap: usize) -> Self {
        Self {
            tracked: Vec::with_capacity(tracked_cap),
            tracked_cap,
        }
    }

    /// The first `tracked_cap` detections of the last decode, engine order.
    pub fn tracked(&self) -> &[Detection] {
        &self.tracked
    }

    /// Decode one engine output. Durations in the result are left at zero.
    ///
    /// A map without `"boxes"` means no detections. The detection count is
    /// `boxes.len() / 4`, rounded down. Any other departure from the schema,
    /// including a score/box count mismatch, is a
    /// [`PipelineError::DecodeContractViolation`].
    pub fn decode(&mut self, output: &EngineValue) -> Result<AnalysisResult, PipelineError> {
        self.tracked.clear();
        let map = detection_map(output)?;

        let Some(boxes) = map.get(BOXES_KEY) else {
            debug!("forward result empty");
            return Ok(AnalysisResult::default());
        };
        let boxes = expect_tensor(boxes, BOXES_KEY)?;
        let scores = map
            .get(SCORES_KEY)
            .ok_or_else(|| PipelineError::contract("output has \"boxes\" but no \"scores\""))
            .and_then(|v| expect_tensor(v, SCORES_KEY))?;

        let count = boxes.data.len() / 4;
        if scores.data.len() != count {
            return Err(PipelineError::contract(format!(
                "{} scores for {} boxes",
                scores.data.len(),
                count
            )));
        }

        // Trailing floats short of a full box are not part of any detection.
        let result = AnalysisResult {
            boxes: boxes.data[..4 * count].to_vec(),
            scores: scores.data.clone(),
            ..AnalysisResult::default()
        };

        for (i, det) in result.detections().enumerate() {
            debug!(
                i,
                score = det.score,
                x0 = det.x0,
                y0 = det.y0,
                x1 = det.x1,
                y1 = det.y1,
                "forward result"
            );
            if i < self.tracked_cap {
                self.tracked.push(det);
            }
        }

        Ok(result)
    }
}

/// Walk `(_, [map, ..])` down to the detection map.
fn detection_map(output: &EngineValue) -> Result<&BTreeMap<String, EngineValue>, PipelineError> {
    let EngineValue::Tuple(items) = output else {
        return Err(PipelineError::contract(format!(
            "expected a tuple, got a {}",
            output.kind()
        )));
    };
    let second = items.get(1).ok_or_else(|| {
        PipelineError::contract(format!("expected a 2-element tuple, got {}", items.len()))
    })?;
    let EngineValue::List(list) = second else {
        return Err(PipelineError::contract(format!(
            "tuple element 1 should be a list, got a {}",
            second.kind()
        )));
    };
    match list.first() {
        Some(EngineValue::Dict(map)) => Ok(map),
        Some(other) => Err(PipelineError::contract(format!(
            "detection list should hold a dict, got a {}",
            other.kind()
        ))),
        None => Err(PipelineError::contract("detection list is empty")),
    }
}

fn expect_tensor<'a>(value: &'a EngineValue, key: &str) -> Result<&'a EngineTensor, PipelineError> {
    match value {
        EngineValue::Tensor(t) => Ok(t),
        other => Err(PipelineError::contract(format!(
            "\"{key}\" should be a tensor, got a {}",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(entries: &[(&str, Vec<f32>)]) -> EngineValue {
        let map = entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), EngineValue::Tensor(EngineTensor::from_vec(v.clone()))))
            .collect();
        EngineValue::detection_output(map)
    }

    #[test]
    fn missing_boxes_means_no_detections() {
        let mut decoder = DetectionDecoder::new(4);
        let result = decoder
            .decode(&output(&[("labels", vec![1.0])]))
            .expect("decode");
        assert!(result.is_empty());
        assert!(result.boxes.is_empty());
        assert!(decoder.tracked().is_empty());
    }

    #[test]
    fn detections_follow_engine_order() {
        let boxes = vec![
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0, //
            9.0, 10.0, 11.0, 12.0,
        ];
        // Deliberately not sorted by score.
        let scores = vec![0.2, 0.9, 0.5];
        let mut decoder = DetectionDecoder::new(4);
        let result = decoder
            .decode(&output(&[("boxes", boxes.clone()), ("scores", scores.clone())]))
            .expect("decode");

        assert_eq!(result.len(), 3);
        assert_eq!(result.boxes, boxes);
        assert_eq!(result.scores, scores);
        let dets: Vec<Detection> = result.detections().collect();
        assert_eq!(
            dets[1],
            Detection {
                score: 0.9,
                x0: 5.0,
                y0: 6.0,
                x1: 7.0,
                y1: 8.0
            }
        );
        assert_eq!(decoder.tracked(), dets.as_slice());
    }

    #[test]
    fn bookkeeping_keeps_only_the_first_four() {
        let n = 7;
        let boxes: Vec<f32> = (0..4 * n).map(|v| v as f32).collect();
        let scores: Vec<f32> = (0..n).map(|i| i as f32 / 10.0).collect();
        let mut decoder = DetectionDecoder::new(4);
        let result = decoder
            .decode(&output(&[("boxes", boxes), ("scores", scores)]))
            .expect("decode");

        assert_eq!(result.len(), 7);
        assert_eq!(decoder.tracked().len(), 4);
        assert_eq!(decoder.tracked()[3].score, 0.3);
        assert_eq!(decoder.tracked()[3].x0, 12.0);
    }

    #[test]
    fn count_mismatch_violates_the_contract() {
        let mut decoder = DetectionDecoder::new(4);
        let err = decoder
            .decode(&output(&[
                ("boxes", vec![0.0; 8]),
                ("scores", vec![0.5, 0.6, 0.7]),
            ]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DecodeContractViolation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn ragged_boxes_count_whole_boxes_only() {
        let mut decoder = DetectionDecoder::new(4);
        let boxes = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = decoder
            .decode(&output(&[("boxes", boxes), ("scores", vec![0.1])]))
            .expect("one whole box");
        assert_eq!(result.len(), 1);
        assert_eq!(result.boxes, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(decoder.tracked()[0].y1, 4.0);

        assert!(matches!(
            decoder.decode(&output(&[("boxes", vec![0.0; 6]), ("scores", vec![0.1, 0.2])])),
            Err(PipelineError::DecodeContractViolation(_))
        ));
    }

    #[test]
    fn boxes_without_scores_are_rejected() {
        let mut decoder = DetectionDecoder::new(4);
        assert!(matches!(
            decoder.decode(&output(&[("boxes", vec![0.0; 4])])),
            Err(PipelineError::DecodeContractViolation(_))
        ));
    }

    #[test]
    fn malformed_structure_is_rejected() {
        let mut decoder = DetectionDecoder::new(4);
        let tensor = EngineValue::Tensor(EngineTensor::from_vec(vec![1.0]));
        assert!(decoder.decode(&tensor).is_err());
        assert!(decoder
            .decode(&EngineValue::Tuple(vec![EngineValue::Dict(BTreeMap::new())]))
            .is_err());
        assert!(decoder
            .decode(&EngineValue::Tuple(vec![
                EngineValue::Dict(BTreeMap::new()),
                EngineValue::List(vec![]),
            ]))
            .is_err());
    }

    #[test]
    fn decoding_resets_the_tracked_list() {
        let mut decoder = DetectionDecoder::new(4);
        decoder
            .decode(&output(&[("boxes", vec![0.0; 4]), ("scores", vec![0.8])]))
            .expect("decode");
        assert_eq!(decoder.tracked().len(), 1);
        decoder.decode(&output(&[])).expect("decode empty");
        assert!(decoder.tracked().is_empty());
    }
}
