//! コマンドディスパッチャ
//!
//! 受信した1行を解析し、PWMドライバーとキャプチャシーケンサーを操作して
//! 応答行を返します。UARTのバイト列をそのまま `feed` に流し込めます。

use core::fmt::Write;

use crate::capture::{AdcChannel, AdcFrontEnd, CaptureSequencer, Clock};
use crate::command::{Command, LineBuffer, Response};
use crate::config::params::{self, adc::MAX_SAMPLES, pwm::DUTY1024_MAX, pwm::MIN_FREQUENCY_HZ};
use crate::error::Error;
use crate::fmt::*;
use crate::pwm_driver::{PeriodListener, PwmDriver, PwmSlices};
use crate::waveform::WaveformConfig;

/// HELLOに返すプログラム名
pub const PROGRAM_NAME: &str = "InductorMachine";

/// duty1024（0-1023）をパーセントに変換
pub fn duty1024_to_percent(duty1024: u32) -> f32 {
    duty1024 as f32 * 100.0 / DUTY1024_MAX as f32
}

/// コマンドディスパッチャ
///
/// `'p` はPWMドライバーに登録するリスナーの寿命、`'m` はそれ以外の参照の寿命。
pub struct Machine<'m, 'p, H, A: ?Sized, C: ?Sized> {
    pwm: &'m PwmDriver<'p, H>,
    sequencer: &'m CaptureSequencer,
    adc: &'m A,
    clock: &'m C,
    listener: Option<&'p (dyn PeriodListener + Sync)>,
    dead_clocks: u16,
    dual_slope: bool,
    samples: [u8; MAX_SAMPLES],
    line: LineBuffer,
}

impl<'m, 'p, H, A, C> Machine<'m, 'p, H, A, C>
where
    H: PwmSlices,
    A: AdcFrontEnd + ?Sized,
    C: Clock + ?Sized,
{
    /// # 引数
    /// * `listener` - PWM起動時に登録する周期境界の通知先。
    ///   外部信号で境界を作る場合は `SenseTrigger`
    pub fn new(
        pwm: &'m PwmDriver<'p, H>,
        sequencer: &'m CaptureSequencer,
        adc: &'m A,
        clock: &'m C,
        listener: Option<&'p (dyn PeriodListener + Sync)>,
    ) -> Self {
        Self {
            pwm,
            sequencer,
            adc,
            clock,
            listener,
            dead_clocks: params::pwm::DEFAULT_DEAD_TIME,
            dual_slope: params::pwm::DEFAULT_DUAL_SLOPE,
            samples: [0; MAX_SAMPLES],
            line: LineBuffer::new(),
        }
    }

    /// 受信した1バイトを処理し、行が完成したら応答を返す
    pub fn feed(&mut self, byte: u8) -> Option<Response> {
        let line = self.line.push(byte)?;
        if line.is_truncated() {
            warn!("Command line too long");
            return Some(Response::syntax_error(line.as_str()));
        }

        let response = match Command::parse(line.as_str()) {
            Ok(command) => self.execute(&command),
            Err(_) => {
                debug!("Syntax error: {}", line.as_str());
                Response::syntax_error(line.as_str())
            }
        };
        Some(response)
    }

    /// コマンドを実行
    pub fn execute(&mut self, command: &Command<'_>) -> Response {
        match *command {
            Command::Hello => Response::ok_with(|w| {
                write!(w, "{} ready (version {}).", PROGRAM_NAME, env!("CARGO_PKG_VERSION"))
            }),
            Command::Pwm {
                hz,
                duty1024,
                dead_clocks,
            } => self.start_pwm(hz, duty1024, dead_clocks),
            Command::Run { hz, duty1024 } => self.run_pwm(hz, duty1024),
            Command::Adc { channel } => self.capture(channel),
            Command::Stop => {
                self.pwm.stop();
                Response::ok("PWM is disabled.")
            }
            Command::Set { name, value } => self.set(name, value),
        }
    }

    fn waveform(&self, hz: u32, duty1024: u32, dead_clocks: u32) -> Result<WaveformConfig, Response> {
        if hz < MIN_FREQUENCY_HZ {
            return Err(Response::error("hz < 10", None));
        }
        if duty1024 > DUTY1024_MAX {
            return Err(Response::error("duty cycle out of range [0,1023]", None));
        }
        if dead_clocks > u32::from(params::MAX_DEAD_TIME_CYCLES) {
            return Err(Response::error("dead clocks value out of range [0, 200]", None));
        }

        Ok(WaveformConfig::new(hz, duty1024_to_percent(duty1024))
            .with_dual_slope(self.dual_slope)
            .with_dead_time(dead_clocks as u16))
    }

    fn start_pwm(&mut self, hz: u32, duty1024: u32, dead_clocks: Option<u32>) -> Response {
        let dead_clocks = dead_clocks.unwrap_or(u32::from(self.dead_clocks));
        let config = match self.waveform(hz, duty1024, dead_clocks) {
            Ok(config) => config,
            Err(response) => return response,
        };
        if self.pwm.is_running() {
            return error_response(Error::AlreadyRunning);
        }

        match self.pwm.start(config, self.listener) {
            Ok(_) => Response::ok("PWM is enabled."),
            Err(e) => error_response(e),
        }
    }

    fn run_pwm(&mut self, hz: u32, duty1024: u32) -> Response {
        let config = match self.waveform(hz, duty1024, u32::from(self.dead_clocks)) {
            Ok(config) => config,
            Err(response) => return response,
        };

        // デッドタイムとスロープは動作中に変えられないので起動し直す
        let retune = self.pwm.config().is_some_and(|running| {
            running.dead_time_cycles == config.dead_time_cycles && running.dual_slope == config.dual_slope
        });
        if !retune {
            return self.start_with(config);
        }

        match self.pwm.change_waveform(config.frequency_hz, config.duty_percent) {
            Ok(_) => Response::ok("PWM is updated."),
            // 直前に停止された場合は起動し直す
            Err(Error::NotRunning) => self.start_with(config),
            Err(e) => error_response(e),
        }
    }

    fn start_with(&mut self, config: WaveformConfig) -> Response {
        match self.pwm.start(config, self.listener) {
            Ok(_) => Response::ok("PWM is enabled."),
            Err(e) => error_response(e),
        }
    }

    fn capture(&mut self, channel: u32) -> Response {
        let channel = match AdcChannel::new(channel) {
            Ok(channel) => channel,
            Err(_) => return Response::error("ADC channel out of range [0,2]->[GPIO26,GPIO28]", None),
        };
        if !self.pwm.is_running() {
            return Response::error("Can't record ADC when PWM isn't running", None);
        }

        let count = match self
            .sequencer
            .measure_period(self.adc, self.clock, channel, &mut self.samples)
        {
            Ok(count) => count,
            Err(e) => return error_response(e),
        };

        let samples = &self.samples[..count];
        Response::ok_with(|w| {
            for (i, sample) in samples.iter().enumerate() {
                if i > 0 {
                    w.write_char(' ')?;
                }
                write!(w, "{}", sample)?;
            }
            Ok(())
        })
    }

    fn set(&mut self, name: &str, value: u32) -> Response {
        if name.eq_ignore_ascii_case("DEAD") {
            if value > u32::from(params::MAX_DEAD_TIME_CYCLES) {
                return Response::error("dead clocks value out of range [0, 200]", None);
            }
            self.dead_clocks = value as u16;
            info!("Dead time set to {} clocks", value);
            Response::ok_with(|w| write!(w, "dead clocks = {}.", value))
        } else if name.eq_ignore_ascii_case("SLOPE") {
            self.dual_slope = match value {
                0 => false,
                1 => true,
                _ => return Response::error("slope out of range [0,1]", None),
            };
            info!("Dual slope set to {}", self.dual_slope);
            Response::ok_with(|w| write!(w, "slope = {}.", value))
        } else {
            Response::error("unknown parameter", Some(name))
        }
    }

    pub fn dead_clocks(&self) -> u16 {
        self.dead_clocks
    }

    pub fn dual_slope(&self) -> bool {
        self.dual_slope
    }
}

fn error_response(error: Error) -> Response {
    Response::error(error.message(), error.param())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureHook, SequencerConfig};
    use crate::config::params::SYS_CLOCK_HZ;
    use crate::mock::{MockAdc, MockClock, MockSlices};
    use crate::pwm_driver::PwmLayout;
    use crate::sense::SenseTrigger;

    const PUSH_PULL: PwmLayout = PwmLayout::PushPull { left: 0, right: 1 };

    fn send<H, A, C>(machine: &mut Machine<'_, '_, H, A, C>, line: &str) -> String
    where
        H: PwmSlices,
        A: AdcFrontEnd + ?Sized,
        C: Clock + ?Sized,
    {
        let mut responses: Vec<Response> = line
            .bytes()
            .chain(core::iter::once(b'\n'))
            .filter_map(|b| machine.feed(b))
            .collect();
        assert_eq!(responses.len(), 1, "{:?}", line);
        responses.remove(0).as_str().to_owned()
    }

    #[test]
    fn test_hello_reports_name_and_version() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        let reply = send(&mut machine, "HELLO");
        assert!(reply.starts_with("OK: InductorMachine ready (version "));
        assert!(reply.ends_with(").\n"));
    }

    #[test]
    fn test_pwm_validation_messages() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let hw = MockSlices::default();
        let pwm = PwmDriver::new(hw.clone(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        assert_eq!(send(&mut machine, "PWM 9 512"), "ERR: hz < 10\n");
        assert_eq!(send(&mut machine, "PWM 5000 1024"), "ERR: duty cycle out of range [0,1023]\n");
        assert_eq!(
            send(&mut machine, "PWM 5000 512 201"),
            "ERR: dead clocks value out of range [0, 200]\n"
        );
        assert_eq!(hw.log().operations, 0);

        assert_eq!(send(&mut machine, "PWM 5000 512"), "OK: PWM is enabled.\n");
        assert_eq!(send(&mut machine, "pwm 6000 512"), "ERR: PWM is already running\n");
        assert_eq!(pwm.config().unwrap().frequency_hz, 5000);
    }

    #[test]
    fn test_pwm_duty_maps_to_percent() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        send(&mut machine, "PWM 1000 1023 20");
        let config = pwm.config().unwrap();
        assert_eq!(config.duty_percent, 100.0);
        assert_eq!(config.dead_time_cycles, 20);
        assert!(config.dual_slope);
        assert_eq!(duty1024_to_percent(0), 0.0);
    }

    #[test]
    fn test_stop_always_succeeds() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        assert_eq!(send(&mut machine, "STOP"), "OK: PWM is disabled.\n");
        send(&mut machine, "PWM 5000 512");
        assert_eq!(send(&mut machine, "stop"), "OK: PWM is disabled.\n");
        assert!(!pwm.is_running());
    }

    #[test]
    fn test_run_starts_then_retunes() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let hw = MockSlices::default();
        let pwm = PwmDriver::new(hw.clone(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        assert_eq!(send(&mut machine, "RUN 5000 512"), "OK: PWM is enabled.\n");
        assert_eq!(send(&mut machine, "RUN 2000 256"), "OK: PWM is updated.\n");
        assert_eq!(pwm.config().unwrap().frequency_hz, 2000);
        // 出力を止めずに変更する
        assert!(hw.log().disable_writes.is_empty());
        assert_eq!(send(&mut machine, "RUN 5 256"), "ERR: hz < 10\n");
    }

    #[test]
    fn test_run_restarts_when_dead_time_or_slope_changed() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let hw = MockSlices::default();
        let pwm = PwmDriver::new(hw.clone(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        assert_eq!(send(&mut machine, "RUN 5000 512"), "OK: PWM is enabled.\n");
        send(&mut machine, "SET DEAD 60");
        assert_eq!(send(&mut machine, "RUN 5000 512"), "OK: PWM is enabled.\n");
        assert_eq!(pwm.config().unwrap().dead_time_cycles, 60);
        assert_eq!(hw.log().disable_writes, vec![0b11]);

        send(&mut machine, "SET SLOPE 0");
        send(&mut machine, "RUN 5000 512");
        assert!(!pwm.config().unwrap().dual_slope);
        assert_eq!(hw.log().disable_writes.len(), 2);

        // 同じ設定なら止めずに変更
        assert_eq!(send(&mut machine, "RUN 4000 512"), "OK: PWM is updated.\n");
        assert_eq!(hw.log().disable_writes.len(), 2);
    }

    #[test]
    fn test_set_tunes_next_start() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        assert_eq!(send(&mut machine, "SET DEAD 40"), "OK: dead clocks = 40.\n");
        assert_eq!(send(&mut machine, "set slope 0"), "OK: slope = 0.\n");
        assert_eq!(
            send(&mut machine, "SET DEAD 300"),
            "ERR: dead clocks value out of range [0, 200]\n"
        );
        assert_eq!(send(&mut machine, "SET SLOPE 2"), "ERR: slope out of range [0,1]\n");
        assert_eq!(send(&mut machine, "SET GAIN 3"), "ERR: unknown parameter [GAIN]\n");

        send(&mut machine, "PWM 5000 512");
        let config = pwm.config().unwrap();
        assert_eq!(config.dead_time_cycles, 40);
        assert!(!config.dual_slope);
        assert_eq!(machine.dead_clocks(), 40);
        assert!(!machine.dual_slope());
    }

    #[test]
    fn test_syntax_errors_echo_line() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        assert_eq!(send(&mut machine, "JUMP 3"), "ERR: Syntax error [JUMP 3]\n");
        assert_eq!(send(&mut machine, "PWM 5000"), "ERR: Syntax error [PWM 5000]\n");

        let long = "PWM 5000 512 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let reply = send(&mut machine, long);
        assert_eq!(reply, format!("ERR: Syntax error [{}]\n", &long[..31]));
        assert!(!pwm.is_running());
    }

    #[test]
    fn test_adc_requires_running_pwm_and_valid_channel() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let clock = MockClock::new(1);
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, None);

        assert_eq!(
            send(&mut machine, "ADC 3"),
            "ERR: ADC channel out of range [0,2]->[GPIO26,GPIO28]\n"
        );
        assert_eq!(send(&mut machine, "ADC 0"), "ERR: Can't record ADC when PWM isn't running\n");
        assert_eq!(adc.selected(), None);
    }

    #[test]
    fn test_adc_returns_one_period_of_samples() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let hook = CaptureHook::new(&seq, &adc);
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        // 5kHzのラップ割り込みを200μsごとに発生させる
        let clock = MockClock::new(1).with_period(200, |now| {
            adc.advance_to(now);
            pwm.on_period_end();
        });
        clock.on_tick(|now| adc.advance_to(now));
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, Some(&hook));

        assert_eq!(send(&mut machine, "PWM 5000 512"), "OK: PWM is enabled.\n");
        let reply = send(&mut machine, "ADC 0");

        let body = reply.strip_prefix("OK: ").unwrap().trim_end();
        let samples: Vec<u32> = body.split(' ').map(|s| s.parse().unwrap()).collect();
        assert!(!samples.is_empty() && samples.len() <= MAX_SAMPLES);
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|&s| s <= 255));
        assert_eq!(adc.selected(), Some(0));
        assert!(adc.released());

        // 2回目も同じ結果
        let again = send(&mut machine, "ADC 0");
        assert_eq!(again.trim_end().split(' ').count() - 1, 100);
    }

    #[test]
    fn test_adc_follows_sense_edges() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let hook = CaptureHook::new(&seq, &adc);
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let sense = SenseTrigger::new(&pwm, &hook, 1);
        // センス信号の立ち下がりが200μsごと
        let clock = MockClock::new(1).with_period(200, |now| {
            adc.advance_to(now);
            sense.on_edge(now);
        });
        clock.on_tick(|now| adc.advance_to(now));
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, Some(&sense));

        send(&mut machine, "PWM 5000 512");
        sense.enable(true);
        let reply = send(&mut machine, "ADC 2");

        assert_eq!(reply.trim_end().split(' ').count() - 1, 100);
        // タイムアウトの疑似境界ではなくエッジで完了している
        assert!(clock.now_us() < 2_000);

        send(&mut machine, "STOP");
        assert!(!adc.is_running());
    }

    #[test]
    fn test_stop_during_capture_returns_short_batch() {
        let adc = MockAdc::new();
        let seq = CaptureSequencer::new(SequencerConfig::default());
        let hook = CaptureHook::new(&seq, &adc);
        let pwm = PwmDriver::new(MockSlices::default(), PUSH_PULL, SYS_CLOCK_HZ);
        let boundaries = core::cell::Cell::new(0);
        let clock = MockClock::new(1).with_period(200, |now| {
            adc.advance_to(now);
            boundaries.set(boundaries.get() + 1);
            if boundaries.get() == 3 {
                pwm.stop();
            } else {
                pwm.on_period_end();
            }
        });
        clock.on_tick(|now| adc.advance_to(now));
        let mut machine = Machine::new(&pwm, &seq, &adc, &clock, Some(&hook));

        send(&mut machine, "PWM 5000 512");
        let reply = send(&mut machine, "ADC 1");

        assert!(reply.starts_with("OK: "));
        assert_eq!(reply.trim_end().split(' ').count() - 1, 100);
        assert!(!pwm.is_running());
        assert!(!adc.is_running());
        assert!(clock.now_us() < 1_000);
    }
}
