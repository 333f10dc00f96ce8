use std::collections::VecDeque;

/// Trailing simple moving average; `None` until `window` values have been seen.
#[derive(Debug, Clone)]
pub struct RollingSma {
    window: usize,
    buf: VecDeque<f64>,
}

impl RollingSma {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            buf: VecDeque::with_capacity(window + 1),
        }
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        if self.window == 0 {
            return None;
        }

        self.buf.push_back(value);
        while self.buf.len() > self.window {
            self.buf.pop_front();
        }

        if self.buf.len() == self.window {
            // Summed from the buffer: a running sum drifts and can flip near-equal crossovers.
            Some(self.buf.iter().sum::<f64>() / self.window as f64)
        } else {
            None
        }
    }
}

/// Wilder-smoothed RSI. The first value is produced after `period` price changes and is seeded
/// with their simple average gain/loss.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    seed_count: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed_count: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        let prev = self.prev_close.replace(close)?;

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;

        if self.seed_count < self.period {
            self.avg_gain += gain / n;
            self.avg_loss += loss / n;
            self.seed_count += 1;
            if self.seed_count < self.period {
                return None;
            }
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        Some(self.value())
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            if self.avg_gain == 0.0 {
                return 50.0;
            }
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Highest high / lowest low of the previous `window` bars, excluding the bar being added.
#[derive(Debug, Clone)]
pub struct PriceChannel {
    window: usize,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
}

impl PriceChannel {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            highs: VecDeque::with_capacity(window + 1),
            lows: VecDeque::with_capacity(window + 1),
        }
    }

    /// Returns the channel as it stood before this bar, then folds the bar in.
    pub fn update(&mut self, high: f64, low: f64) -> Option<(f64, f64)> {
        if self.window == 0 {
            return None;
        }

        let channel = if self.highs.len() == self.window {
            let upper = self.highs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let lower = self.lows.iter().copied().fold(f64::INFINITY, f64::min);
            Some((upper, lower))
        } else {
            None
        };

        self.highs.push_back(high);
        self.lows.push_back(low);
        while self.highs.len() > self.window {
            self.highs.pop_front();
            self.lows.pop_front();
        }

        channel
    }
}

#[cfg(test)]
mod tests {
    use super::{PriceChannel, RollingSma, WilderRsi};

    #[test]
    fn sma_waits_for_full_window() {
        let mut sma = RollingSma::new(3);
        assert_eq!(sma.update(1.0), None);
        assert_eq!(sma.update(2.0), None);
        assert_eq!(sma.update(3.0), Some(2.0));
        assert_eq!(sma.update(4.0), Some(3.0));
        assert_eq!(RollingSma::new(0).update(1.0), None);
    }

    #[test]
    fn rsi_seed_and_smoothing() {
        let mut rsi = WilderRsi::new(2);
        assert_eq!(rsi.update(10.0), None);
        assert_eq!(rsi.update(11.0), None);
        // Seed: gains [1, 0], losses [0, 1] -> avg 0.5 / 0.5.
        assert_eq!(rsi.update(10.0), Some(50.0));
        // avg_gain = (0.5 + 2) / 2 = 1.25, avg_loss = 0.25.
        let value = rsi.update(12.0).expect("rsi");
        assert!((value - (100.0 - 100.0 / 6.0)).abs() < 1e-9);
    }

    #[test]
    fn rsi_edge_values() {
        let mut rising = WilderRsi::new(3);
        let values: Vec<Option<f64>> = [1.0, 2.0, 3.0, 4.0]
            .iter()
            .map(|c| rising.update(*c))
            .collect();
        assert_eq!(values[3], Some(100.0));

        let mut flat = WilderRsi::new(2);
        let values: Vec<Option<f64>> = [5.0, 5.0, 5.0].iter().map(|c| flat.update(*c)).collect();
        assert_eq!(values[2], Some(50.0));
    }

    #[test]
    fn channel_excludes_current_bar() {
        let mut channel = PriceChannel::new(2);
        assert_eq!(channel.update(10.0, 8.0), None);
        assert_eq!(channel.update(12.0, 9.0), None);
        assert_eq!(channel.update(50.0, 1.0), Some((12.0, 8.0)));
        assert_eq!(channel.update(11.0, 10.0), Some((50.0, 1.0)));
    }
}
