//! 表示器
//!
//! 描画先は `Display` トレイトで抽象化し、キャプチャ波形のグラフと
//! 設定パネルの状態表示をここで描きます。具体的なLCDドライバーは持ちません。

use core::fmt::Write;

use heapless::String;

use crate::panel::{Mode, PanelStatus};

/// RGB565
pub type Color = u16;

/// 8ビットRGBからRGB565を作る
pub const fn rgb565(r: u8, g: u8, b: u8) -> Color {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

pub const BACKGROUND: Color = rgb565(0, 0, 50);
pub const GRID: Color = rgb565(50, 50, 50);
pub const TRACE: Color = rgb565(255, 255, 0);
pub const TEXT: Color = rgb565(255, 255, 255);
pub const ALERT: Color = rgb565(255, 0, 0);

/// 文字の行送り [px]
pub const LINE_HEIGHT: i32 = 20;

/// 描画先
pub trait Display {
    type Error;

    fn draw_rect(&mut self, area: Rect, color: Color) -> Result<(), Self::Error>;

    fn draw_line(&mut self, from: Point, to: Point, color: Color) -> Result<(), Self::Error>;

    fn draw_text(&mut self, at: Point, text: &str, color: Color) -> Result<(), Self::Error>;

    /// 描画内容を画面に反映
    fn flush(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }
}

/// 背景と目盛り線を描く（横10分割・中央線、縦4分割）
pub fn render_grid<D: Display>(display: &mut D, area: Rect) -> Result<(), D::Error> {
    display.draw_rect(area, BACKGROUND)?;

    const Y_BANDS: i32 = 10;
    for i in 0..=Y_BANDS {
        let y = area.y + i * area.height / Y_BANDS;
        display.draw_line(Point::new(area.x, y), Point::new(area.right(), y), GRID)?;
    }

    const X_BANDS: i32 = 4;
    for i in 0..=X_BANDS {
        let x = area.x + i * area.width / X_BANDS;
        display.draw_line(Point::new(x, area.y), Point::new(x, area.bottom()), GRID)?;
    }
    Ok(())
}

/// キャプチャしたサンプルを折れ線で描く
///
/// 横方向はサンプル数で領域幅を等分し、縦方向は0-255を領域の高さに
/// 合わせます（画面のyは下向きなので値が大きいほど上）。
pub fn render_capture<D: Display>(display: &mut D, samples: &[u8], area: Rect) -> Result<(), D::Error> {
    if samples.len() < 2 || area.width <= 0 || area.height <= 0 {
        return Ok(());
    }

    let x_step = area.width as f32 / samples.len() as f32;
    let y_scale = area.height as f32 / 256.0;
    let y_bottom = area.bottom() - 1;
    let point = |i: usize, sample: u8| {
        let scaled = (f32::from(sample) * y_scale).min((area.height - 1) as f32);
        Point::new(area.x + (i as f32 * x_step) as i32, y_bottom - scaled as i32)
    };

    let mut from = point(0, samples[0]);
    for (i, &sample) in samples.iter().enumerate().skip(1) {
        let to = point(i, sample);
        display.draw_line(from, to, TRACE)?;
        from = to;
    }
    Ok(())
}

/// 設定パネルの状態を文字で描く（調整中の項目に `>` を付ける）
pub fn render_status<D: Display>(display: &mut D, status: &PanelStatus, origin: Point) -> Result<(), D::Error> {
    let marker = |mode: Mode| if status.mode == mode { '>' } else { ' ' };
    let mut line: String<32> = String::new();
    let mut y = origin.y;

    let mut text = |display: &mut D, line: &String<32>, color: Color| {
        let result = display.draw_text(Point::new(origin.x, y), line.as_str(), color);
        y += LINE_HEIGHT;
        result
    };

    let _ = write!(line, "{}Hz: {}", marker(Mode::Hz), status.config.pwm_hz);
    text(display, &line, TEXT)?;

    line.clear();
    let _ = write!(line, "{}Duty: {:.0}%", marker(Mode::Duty), status.config.duty_percent());
    text(display, &line, TEXT)?;

    line.clear();
    let _ = write!(line, "{}Limit: {:.1} A", marker(Mode::Limit), status.config.amp_limit);
    text(display, &line, TEXT)?;

    line.clear();
    let _ = write!(line, " Amps: {:.1} A", status.amps);
    text(display, &line, TEXT)?;

    let (state, color) = if status.alarm {
        (" ALARM", ALERT)
    } else if status.running {
        (" ON", TEXT)
    } else {
        (" OFF", TEXT)
    };
    line.clear();
    let _ = line.push_str(state);
    text(display, &line, color)?;

    display.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::storage::DeviceConfig;
    use crate::mock::{DrawOp, RecordingDisplay};

    const AREA: Rect = Rect::new(10, 20, 200, 100);

    fn lines(display: &RecordingDisplay) -> Vec<(Point, Point)> {
        display
            .ops
            .iter()
            .filter_map(|op| match *op {
                DrawOp::Line(from, to, TRACE) => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_capture_is_one_segment_per_step() {
        let mut display = RecordingDisplay::default();
        let samples: Vec<u8> = (0..100).map(|i| (i * 2) as u8).collect();
        render_capture(&mut display, &samples, AREA).unwrap();

        let segments = lines(&display);
        assert_eq!(segments.len(), 99);
        // つながった折れ線
        for pair in segments.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(segments[0].0, Point::new(10, 119));
    }

    #[test]
    fn test_capture_stays_inside_area() {
        let mut display = RecordingDisplay::default();
        let samples = [0u8, 255, 128, 255, 0, 1, 254];
        render_capture(&mut display, &samples, AREA).unwrap();

        for (from, to) in lines(&display) {
            for p in [from, to] {
                assert!(p.x >= AREA.x && p.x < AREA.right(), "{:?}", p);
                assert!(p.y >= AREA.y && p.y < AREA.bottom(), "{:?}", p);
            }
        }
        // 大きい値ほど上
        let segments = lines(&display);
        assert!(segments[0].1.y < segments[0].0.y);
    }

    #[test]
    fn test_capture_too_short_draws_nothing() {
        let mut display = RecordingDisplay::default();
        render_capture(&mut display, &[], AREA).unwrap();
        render_capture(&mut display, &[42], AREA).unwrap();
        assert!(display.ops.is_empty());
    }

    #[test]
    fn test_grid_draws_background_and_lines() {
        let mut display = RecordingDisplay::default();
        render_grid(&mut display, AREA).unwrap();
        assert_eq!(display.ops[0], DrawOp::Rect(AREA, BACKGROUND));
        assert_eq!(display.ops.len(), 1 + 11 + 5);
    }

    #[test]
    fn test_status_marks_active_mode() {
        let mut display = RecordingDisplay::default();
        let status = PanelStatus {
            mode: Mode::Duty,
            config: DeviceConfig::default(),
            running: true,
            alarm: false,
            amps: 1.5,
        };
        render_status(&mut display, &status, Point::new(0, 0)).unwrap();

        assert_eq!(
            display.texts(),
            vec![" Hz: 5000", ">Duty: 50%", " Limit: 5.0 A", " Amps: 1.5 A", " ON"]
        );
        assert_eq!(display.flushes, 1);
    }

    #[test]
    fn test_status_shows_alarm() {
        let mut display = RecordingDisplay::default();
        let status = PanelStatus {
            mode: Mode::Hz,
            config: DeviceConfig::default(),
            running: false,
            alarm: true,
            amps: 0.0,
        };
        render_status(&mut display, &status, Point::new(0, 0)).unwrap();

        assert_eq!(display.ops.last(), Some(&DrawOp::Text(Point::new(0, 80), " ALARM".into(), ALERT)));
    }
}
