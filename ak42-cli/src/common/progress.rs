//! Console progress for exports.

use ak42_format::{ExportObserver, TensorReport};

/// Prints one line per quantized tensor to stdout.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    backoff: Option<(usize, usize)>,
    printed: usize,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line recap of the quantized tensors, or `None` for fp32 exports.
    pub fn summary(&self, group_size: Option<usize>) -> Option<String> {
        let group_size = group_size.filter(|_| self.printed > 0)?;
        let mut line = format!(
            "Quantized {} tensors with group size {}",
            self.printed, group_size
        );
        if let Some((requested, _)) = self.backoff {
            line.push_str(&format!(" (requested {})", requested));
        }
        Some(line)
    }
}

/// `[3/15] quantized layers.0.attention.wk.weight (8x8) to Q8_0 with max error 0.00412`
///
/// `index` is 1-based.
pub fn format_tensor_line(index: usize, total: usize, report: &TensorReport) -> String {
    let shape = report
        .shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x");
    format!(
        "[{}/{}] quantized {} ({}) to {} with max error {:.5}",
        index,
        total,
        report.name,
        shape,
        report.codec,
        report.max_error
    )
}

impl ExportObserver for ConsoleProgress {
    fn group_size_backoff(&mut self, requested: usize, effective: usize) {
        println!(
            "BACKOFF: group size {} does not divide dim, using {}",
            requested, effective
        );
        self.backoff = Some((requested, effective));
    }

    fn tensor_quantized(&mut self, index: usize, total: usize, report: &TensorReport) {
        println!("{}", format_tensor_line(index, total, report));
        self.printed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak42_format::QuantCodec;

    fn report() -> TensorReport {
        TensorReport {
            name: "layers.0.attention.wq.weight".to_string(),
            shape: vec![8, 8],
            codec: QuantCodec::Q4_0,
            max_error: 0.125,
        }
    }

    #[test]
    fn test_format_tensor_line() {
        assert_eq!(
            format_tensor_line(1, 15, &report()),
            "[1/15] quantized layers.0.attention.wq.weight (8x8) to Q4_0 with max error 0.12500"
        );
    }

    #[test]
    fn test_observer_records() {
        let mut progress = ConsoleProgress::new();
        progress.group_size_backoff(64, 4);
        progress.tensor_quantized(1, 2, &report());
        progress.tensor_quantized(2, 2, &report());
        assert_eq!(
            progress.summary(Some(4)).as_deref(),
            Some("Quantized 2 tensors with group size 4 (requested 64)")
        );
    }

    #[test]
    fn test_summary_without_backoff() {
        let mut progress = ConsoleProgress::new();
        assert_eq!(progress.summary(None), None);
        assert_eq!(progress.summary(Some(8)), None);
        progress.tensor_quantized(1, 1, &report());
        assert_eq!(
            progress.summary(Some(8)).as_deref(),
            Some("Quantized 1 tensors with group size 8")
        );
    }
}
