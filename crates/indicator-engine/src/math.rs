/// Closing-price / candle math, ported from the corpus's technical-analysis
/// indicator formulas and condensed to the subset the snapshot needs.
#[inline]
fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(finite_or(sum / period as f64, 0.0));
    }
    result
}

pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }
    let mut result = Vec::with_capacity(data.len());
    let multiplier = 2.0 / (period as f64 + 1.0);

    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let sma_seed = finite_or(data[..period].iter().sum::<f64>() / period as f64, 0.0);
    for _ in 0..period {
        result.push(sma_seed);
    }
    for i in period..data.len() {
        let prev_ema = result[i - 1];
        let ema_val = (data[i] - prev_ema) * multiplier + prev_ema;
        result.push(finite_or(ema_val, prev_ema));
    }
    result
}

pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }
    let mut gains = Vec::new();
    let mut losses = Vec::new();
    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    let mut rsi_values = Vec::with_capacity(data.len() - period);

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        let rs = if avg_loss == 0.0 { 100.0 } else { avg_gain / avg_loss };
        let value = 100.0 - (100.0 / (1.0 + rs));
        rsi_values.push(finite_or(value, 50.0));
    }
    rsi_values
}

pub struct Macd {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    if fast == 0 || slow == 0 || signal == 0 || slow < fast {
        return Macd { macd_line: vec![], signal_line: vec![], histogram: vec![] };
    }
    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    let offset = slow - fast;
    let mut macd_line = Vec::new();
    for i in offset..ema_fast.len() {
        if i - offset < ema_slow.len() {
            macd_line.push(ema_fast[i] - ema_slow[i - offset]);
        }
    }
    let signal_line = ema(&macd_line, signal);
    let hist_offset = macd_line.len().saturating_sub(signal_line.len());
    let mut histogram = Vec::new();
    for i in 0..signal_line.len() {
        histogram.push(macd_line[i + hist_offset] - signal_line[i]);
    }
    Macd { macd_line, signal_line, histogram }
}

pub struct Bollinger {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> Bollinger {
    if period == 0 || data.len() < period {
        return Bollinger { upper: vec![], middle: vec![], lower: vec![] };
    }
    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());
    for i in period - 1..data.len() {
        let slice = &data[i + 1 - period..=i];
        let mean = middle[i + 1 - period];
        let variance: f64 = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();
        upper.push(finite_or(mean + std_dev * std, mean));
        lower.push(finite_or(mean - std_dev * std, mean));
    }
    Bollinger { upper, middle, lower }
}

/// Nearest swing-based support/resistance levels within `lookback` candles,
/// using a 2-bar confirmation window on each side (corpus's
/// `support_resistance`), returning up to 3 levels on each side.
pub fn support_resistance(highs: &[f64], lows: &[f64], current_price: f64, lookback: usize) -> (Vec<f64>, Vec<f64>) {
    if highs.len() < lookback + 4 || lows.len() != highs.len() {
        return (vec![], vec![]);
    }
    let start = highs.len() - lookback;
    let recent_highs = &highs[start..];
    let recent_lows = &lows[start..];

    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();
    for i in 2..recent_highs.len() - 2 {
        if recent_highs[i] > recent_highs[i - 1]
            && recent_highs[i] > recent_highs[i - 2]
            && recent_highs[i] > recent_highs[i + 1]
            && recent_highs[i] > recent_highs[i + 2]
        {
            swing_highs.push(recent_highs[i]);
        }
        if recent_lows[i] < recent_lows[i - 1]
            && recent_lows[i] < recent_lows[i - 2]
            && recent_lows[i] < recent_lows[i + 1]
            && recent_lows[i] < recent_lows[i + 2]
        {
            swing_lows.push(recent_lows[i]);
        }
    }

    let mut resistance: Vec<f64> = swing_highs.into_iter().filter(|&h| h > current_price).collect();
    resistance.sort_by(|a, b| a.partial_cmp(b).unwrap());
    resistance.truncate(3);

    let mut support: Vec<f64> = swing_lows.into_iter().filter(|&l| l < current_price).collect();
    support.sort_by(|a, b| b.partial_cmp(a).unwrap());
    support.truncate(3);

    (support, resistance)
}
