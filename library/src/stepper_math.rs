// https://www.littlechip.co.nz/blog/a-simple-stepper-motor-control-algorithm
// Delays are timer ticks in 24.8 fixed point so the recurrence keeps its fraction between steps.

pub const DELAY_FRACTION_BITS: u32 = 8;

pub fn ticks_to_delay(ticks: u32) -> u32 {
    ticks << DELAY_FRACTION_BITS
}

pub fn delay_to_ticks(delay: u32) -> u32 {
    delay >> DELAY_FRACTION_BITS
}

/// Delay before the first step from standstill, c0 = 0.676 * f * sqrt(2 / a).
/// `acceleration` is in steps/s^2.
pub fn first_step_delay(timer_frequency: u32, acceleration: f32) -> f32 {
    0.676 * timer_frequency as f32 * libm::sqrtf(2.0 / acceleration) * (1 << DELAY_FRACTION_BITS) as f32
}

/// Fixed-point delay between steps at a constant `rate` (steps/s), clamped to `[min, max]`.
pub fn delay_for_rate(timer_frequency: u32, rate: f32, min: u32, max: u32) -> u32 {
    if !(rate > 0.0) {
        return max;
    }
    let delay = timer_frequency as f32 * (1 << DELAY_FRACTION_BITS) as f32 / rate;
    if delay >= max as f32 { max } else { (delay as u32).max(min) }
}

/// Number of steps needed to reach `rate` from standstill at `acceleration`, n = v^2 / 2a.
pub fn ramp_index(rate: f32, acceleration: f32) -> u32 {
    (rate * rate / (2.0 * acceleration) + 0.5) as u32
}

/// c_n = c_(n-1) * (4n - 1) / (4n + 1)
pub fn inter_step_acc_delay(previous_delay: u32, step_number: u32) -> Option<u32> {
    let fourx = 4 * step_number as u64;
    let numerator = fourx.checked_sub(1)?;
    let denominator = fourx + 1;
    u32::try_from((previous_delay as u64 * numerator) / denominator).ok()
}

/// c_n = c_(n-1) * (4n + 1) / (4n - 1), with `step_number` counting down towards standstill.
pub fn inter_step_dec_delay(previous_delay: u32, step_number: u32) -> Option<u32> {
    let fourx = 4 * step_number as u64;
    let numerator = fourx + 1;
    let denominator = fourx.checked_sub(1)?;
    u32::try_from((previous_delay as u64 * numerator) / denominator).ok()
}

#[cfg(test)]
mod tests {
    use arrayvec::ArrayVec;
    #[allow(unused_imports)]
    use micromath::F32Ext;
    use super::*;

    #[test]
    fn first_delay_not_zero() {
        let delay = first_step_delay(2_000_000, 80_000.0);
        assert!(delay > 0.0);
    }

    #[test]
    fn delay_for_rate_clamps() {
        assert_eq!(delay_for_rate(2_000_000, 0.0, 100, 1000), 1000);
        assert_eq!(delay_for_rate(2_000_000, 1.0e9, 100, 1000), 100);
        // 8000 steps/s at 2MHz is 250 ticks
        assert_eq!(delay_for_rate(2_000_000, 8000.0, 0, u32::MAX >> 1), ticks_to_delay(250));
    }

    #[test]
    fn ten_steps_accelerate() {
        let first_delay = first_step_delay(2_000_000, 80_000.0) as u32;
        let mut data = ArrayVec::<u32, 10>::default();
        data.push(first_delay);
        for i in 1..10 {
            data.push(inter_step_acc_delay(data[i - 1], i as u32).unwrap());
        }
        assert!(data.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn acc_dec() {
        let first_delay = first_step_delay(2_000_000, 80_000.0) as u32;
        let mut acc = ArrayVec::<u32, 10>::default();
        let mut dec = ArrayVec::<u32, 9>::default();
        acc.push(first_delay);
        for i in 1..10 {
            acc.push(inter_step_acc_delay(acc[i - 1], i as u32).unwrap());
        }
        dec.push(inter_step_dec_delay(acc[9], 9).unwrap());
        for i in 1..9 {
            dec.push(inter_step_dec_delay(dec[i - 1], 9 - i as u32).unwrap());
        }
        assert!(dec.windows(2).all(|w| w[1] > w[0]));
        // the descent retraces the ascent within rounding
        let last = *dec.last().unwrap() as f32;
        assert!((last - acc[0] as f32).abs() / (acc[0] as f32) < 0.01);
    }

    #[test]
    fn dec_from_zero_index_is_rejected() {
        assert_eq!(inter_step_dec_delay(1000, 0), None);
        assert_eq!(inter_step_acc_delay(1000, 0), None);
    }

    #[test]
    fn ramp_index_matches_distance() {
        // 8000 steps/s at 80000 steps/s^2 takes 400 steps
        assert_eq!(ramp_index(8000.0, 80_000.0), 400);
        assert_eq!(ramp_index(0.0, 80_000.0), 0);
    }
}
