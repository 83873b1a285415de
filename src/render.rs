//! Half-block terminal drawing. Each terminal cell shows two vertical
//! pixels: the top one as foreground of `▀`, the bottom one as background.

use std::io::{self, Write};

use crossterm::{
    cursor, queue,
    style::{self, Color as CColor},
};

use crate::game::{Game, Phase};
use crate::mapper::MapperMode;
use crate::physics::World;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Rgb(u8, u8, u8);

impl Rgb {
    const fn lerp(a: Rgb, b: Rgb, t_256: u16) -> Rgb {
        let t = t_256 as i32;
        Rgb(
            (a.0 as i32 + (b.0 as i32 - a.0 as i32) * t / 256) as u8,
            (a.1 as i32 + (b.1 as i32 - a.1 as i32) * t / 256) as u8,
            (a.2 as i32 + (b.2 as i32 - a.2 as i32) * t / 256) as u8,
        )
    }

    fn dim(self) -> Rgb {
        Rgb(self.0 / 2, self.1 / 2, self.2 / 2)
    }

    fn term(self) -> CColor {
        CColor::Rgb {
            r: self.0,
            g: self.1,
            b: self.2,
        }
    }
}

const SKY_TOP: Rgb = Rgb(70, 180, 200);
const SKY_BOT: Rgb = Rgb(190, 232, 245);
const GRASS: Rgb = Rgb(84, 168, 55);
const GRASS_LIGHT: Rgb = Rgb(110, 200, 70);
const DIRT: Rgb = Rgb(210, 185, 110);
const DIRT_DARK: Rgb = Rgb(185, 160, 90);
const HILL: Rgb = Rgb(120, 195, 75);
const PIPE_DARK: Rgb = Rgb(74, 122, 26);
const PIPE_MID: Rgb = Rgb(100, 170, 40);
const PIPE_HI: Rgb = Rgb(145, 215, 62);
const PIPE_HELD: Rgb = Rgb(200, 90, 60);
const BIRD: Rgb = Rgb(245, 200, 66);
const BIRD_UP: Rgb = Rgb(120, 220, 255);
const BIRD_DOWN: Rgb = Rgb(255, 140, 200);
const BIRD_EYE: Rgb = Rgb(255, 255, 255);
const BIRD_BEAK: Rgb = Rgb(225, 75, 35);
const WHITE: Rgb = Rgb(255, 255, 255);
const SHADOW: Rgb = Rgb(30, 30, 30);
const PANEL: Rgb = Rgb(220, 195, 120);
const STATUS_BG: Rgb = Rgb(25, 35, 45);
const STATUS_FG: Rgb = Rgb(220, 230, 235);

struct PixelBuf {
    w: usize,
    h: usize,
    px: Vec<Rgb>,
}

impl PixelBuf {
    fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            px: vec![SKY_TOP; w * h],
        }
    }

    fn set(&mut self, x: i32, y: i32, c: Rgb) {
        if x >= 0 && y >= 0 && (x as usize) < self.w && (y as usize) < self.h {
            self.px[y as usize * self.w + x as usize] = c;
        }
    }

    fn get(&self, x: usize, y: usize) -> Rgb {
        self.px[y * self.w + x]
    }

    fn fill_rect(&mut self, x: i32, y: i32, w: i32, h: i32, c: Rgb) {
        for dy in 0..h {
            for dx in 0..w {
                self.set(x + dx, y + dy, c);
            }
        }
    }

    fn fill_circle(&mut self, cx: f64, cy: f64, r: f64, c: Rgb) {
        let (x0, x1) = ((cx - r).floor() as i32, (cx + r).ceil() as i32);
        let (y0, y1) = ((cy - r).floor() as i32, (cy + r).ceil() as i32);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (dx, dy) = (x as f64 + 0.5 - cx, y as f64 + 0.5 - cy);
                if dx * dx + dy * dy <= r * r {
                    self.set(x, y, c);
                }
            }
        }
    }

    fn darken(&mut self) {
        for p in &mut self.px {
            *p = p.dim();
        }
    }

    /// Writes `rows` terminal rows, skipping colour changes that would be
    /// no-ops.
    fn render(&self, out: &mut impl Write, rows: usize) -> io::Result<()> {
        queue!(out, cursor::MoveTo(0, 0))?;
        let mut prev: Option<(Rgb, Rgb)> = None;

        for row in 0..rows.min(self.h / 2) {
            for col in 0..self.w {
                let top = self.get(col, row * 2);
                let bot = self.get(col, row * 2 + 1);
                if prev != Some((top, bot)) {
                    queue!(
                        out,
                        style::SetForegroundColor(top.term()),
                        style::SetBackgroundColor(bot.term())
                    )?;
                    prev = Some((top, bot));
                }
                queue!(out, style::Print('\u{2580}'))?; // ▀
            }
            queue!(out, style::ResetColor, style::Print("\r\n"))?;
            prev = None;
        }
        Ok(())
    }
}

#[rustfmt::skip]
const DIGITS: [[u8; 15]; 10] = [
    [1,1,1, 1,0,1, 1,0,1, 1,0,1, 1,1,1],
    [0,1,0, 1,1,0, 0,1,0, 0,1,0, 1,1,1],
    [1,1,1, 0,0,1, 1,1,1, 1,0,0, 1,1,1],
    [1,1,1, 0,0,1, 0,1,1, 0,0,1, 1,1,1],
    [1,0,1, 1,0,1, 1,1,1, 0,0,1, 0,0,1],
    [1,1,1, 1,0,0, 1,1,1, 0,0,1, 1,1,1],
    [1,1,1, 1,0,0, 1,1,1, 1,0,1, 1,1,1],
    [1,1,1, 0,0,1, 0,1,0, 0,1,0, 0,1,0],
    [1,1,1, 1,0,1, 1,1,1, 1,0,1, 1,1,1],
    [1,1,1, 1,0,1, 1,1,1, 0,0,1, 1,1,1],
];

fn draw_number(buf: &mut PixelBuf, cx: i32, y: i32, n: u32, fg: Rgb) {
    let s = n.to_string();
    let start_x = cx - (s.len() as i32 * 4 - 1) / 2;
    for (i, ch) in s.bytes().enumerate() {
        let glyph = &DIGITS[(ch - b'0') as usize];
        let x = start_x + i as i32 * 4;
        for (k, _) in glyph.iter().enumerate().filter(|(_, on)| **on == 1) {
            let (px, py) = (x + (k % 3) as i32, y + (k / 3) as i32);
            buf.set(px + 1, py + 1, SHADOW);
            buf.set(px, py, fg);
        }
    }
}

fn pipe_shade(x: i32, total_w: i32) -> Rgb {
    if total_w <= 1 {
        return PIPE_MID;
    }
    let t = (x as f64 / (total_w - 1) as f64 * 256.0) as u16;
    match t {
        0..64 => Rgb::lerp(PIPE_DARK, PIPE_MID, t * 4),
        64..128 => Rgb::lerp(PIPE_MID, PIPE_HI, (t - 64) * 4),
        _ => Rgb::lerp(PIPE_HI, PIPE_DARK, (t - 128).min(128) * 2),
    }
}

/// Owns the pixel buffer between frames.
pub struct Renderer {
    buf: PixelBuf,
    rows: usize,
}

impl Renderer {
    /// `rows` is the terminal height; the bottom row is the status line.
    pub fn new(cols: usize, rows: usize) -> Self {
        let play_rows = rows.saturating_sub(1).max(1);
        Self {
            buf: PixelBuf::new(cols, play_rows * 2),
            rows: play_rows,
        }
    }

    /// Pixel size of the play field for a terminal of `cols`×`rows`.
    pub fn field_size(cols: usize, rows: usize) -> (usize, usize) {
        (cols, rows.saturating_sub(1).max(1) * 2)
    }

    pub fn draw(&mut self, game: &Game, out: &mut impl Write) -> io::Result<()> {
        let world = game.world();
        self.draw_world(game, world);
        let cx = self.buf.w as i32 / 2;
        draw_number(&mut self.buf, cx, 4, game.score(), WHITE);

        let banner = match game.phase() {
            Phase::Ready => Some("SPACE to start"),
            Phase::Paused => {
                self.buf.darken();
                Some("PAUSED")
            }
            Phase::Dead if game.dead_timer() > 15 => {
                self.draw_game_over(game);
                Some("SPACE to retry")
            }
            _ => None,
        };
        let banner_row = banner.map(|text| self.draw_banner_box(text));

        self.buf.render(out, self.rows)?;
        if let (Some(text), Some(row)) = (banner, banner_row) {
            let col = (self.buf.w.saturating_sub(text.len()) / 2) as u16;
            queue!(
                out,
                cursor::MoveTo(col, row),
                style::SetForegroundColor(WHITE.term()),
                style::SetBackgroundColor(SHADOW.term()),
                style::Print(text),
                style::ResetColor
            )?;
        }
        self.draw_status(game, out)?;
        out.flush()
    }

    fn draw_world(&mut self, game: &Game, world: &World) {
        let buf = &mut self.buf;
        let ground = world.ground_y() as i32;
        let scale = world.params().scale;

        for y in 0..ground.max(1) {
            let c = Rgb::lerp(SKY_TOP, SKY_BOT, (y * 256 / ground.max(1)) as u16);
            for x in 0..buf.w as i32 {
                buf.set(x, y, c);
            }
        }
        for x in 0..buf.w as i32 {
            let fx = (x as f64 + world.scroll_x() * 0.2) * 0.05;
            let h = ((fx.sin() * 5.0 + (fx * 1.7).sin() * 2.0) * scale) as i32;
            for y in (ground - h - (3.0 * scale) as i32)..ground {
                buf.set(x, y, HILL);
            }
        }

        let pw = world.params().pipe_width as i32;
        let held = world.contact().map(|c| c.pipe_id);
        for pipe in world.pipes() {
            let px = pipe.x as i32;
            for dx in 0..pw {
                let c = if held == Some(pipe.id) {
                    PIPE_HELD
                } else {
                    pipe_shade(dx, pw)
                };
                for y in 0..pipe.top_height as i32 {
                    buf.set(px + dx, y, c);
                }
                for y in pipe.bottom_y as i32..ground {
                    buf.set(px + dx, y, c);
                }
            }
            buf.fill_rect(px - 1, pipe.top_height as i32 - 2, pw + 2, 2, PIPE_DARK);
            buf.fill_rect(px - 1, pipe.bottom_y as i32, pw + 2, 2, PIPE_DARK);
        }

        for x in 0..buf.w as i32 {
            let alt = ((x as f64 + world.scroll_x()) as i32 / 3) % 2 == 0;
            buf.set(x, ground, if alt { GRASS } else { GRASS_LIGHT });
            buf.set(x, ground + 1, GRASS);
            for y in (ground + 2)..buf.h as i32 {
                let stripe = ((x as f64 + world.scroll_x() * 0.8) as i32 + (y - ground) * 2) % 12 < 6;
                buf.set(x, y, if stripe { DIRT } else { DIRT_DARK });
            }
        }

        let bird = world.bird();
        let actions = game.mapper().actions();
        let body = match (actions.up, actions.down) {
            (true, false) => BIRD_UP,
            (false, true) => BIRD_DOWN,
            _ => BIRD,
        };
        buf.fill_circle(bird.x, bird.y, bird.radius, body);
        let (bx, by, r) = (bird.x as i32, bird.y as i32, bird.radius as i32);
        buf.set(bx + r / 2, by - r / 2, BIRD_EYE);
        buf.fill_rect(bx + r, by, (r / 2).max(1) + 1, 1, BIRD_BEAK);
    }

    /// Shadow strip behind a line of banner text. Returns the terminal row
    /// the text goes on.
    fn draw_banner_box(&mut self, text: &str) -> u16 {
        let buf = &mut self.buf;
        let row = (self.rows * 3 / 4).min(self.rows.saturating_sub(1));
        let w = text.len() as i32 + 4;
        let x0 = buf.w as i32 / 2 - w / 2;
        buf.fill_rect(x0, row as i32 * 2 - 2, w, 6, SHADOW);
        row as u16
    }

    fn draw_game_over(&mut self, game: &Game) {
        let buf = &mut self.buf;
        buf.darken();
        let scale = game.world().params().scale;
        let (cx, cy) = (buf.w as i32 / 2, buf.h as i32 / 2);
        let panel_w = (40.0 * scale).max(30.0) as i32;
        let panel_h = (20.0 * scale).max(16.0) as i32;
        let (px, py) = (cx - panel_w / 2, cy - panel_h / 2);
        buf.fill_rect(px - 1, py - 1, panel_w + 2, panel_h + 2, SHADOW);
        buf.fill_rect(px, py, panel_w, panel_h, DIRT);
        buf.fill_rect(px + 1, py + 1, panel_w - 2, panel_h - 2, PANEL);
        draw_number(buf, cx, py + 4, game.score(), WHITE);
        draw_number(buf, cx, py + 12, game.best(), BIRD);
    }

    fn draw_status(&self, game: &Game, out: &mut impl Write) -> io::Result<()> {
        let mapper = game.mapper();
        let mode = match mapper.config().mode {
            MapperMode::Note => "note",
            MapperMode::Chord => "chord",
        };
        let mut line = format!(
            " {} | {:.1}x | {} | {} | {}",
            mapper.config_description(),
            game.speed(),
            if game.practice() { "practice" } else { "normal" },
            mapper.status().summary(),
            game.tracker()
                .map(|t| t.status_line())
                .unwrap_or_else(|| "tracking off".to_string()),
        );
        if let (Phase::Dead, Some(summary)) = (game.phase(), game.last_summary()) {
            line.push_str(&format!(" | last session {}", summary.score));
        }
        line.push_str(&format!(" | m:{mode} t:practice +/-:speed p:pause q:quit"));

        let width = self.buf.w;
        let text: String = line.chars().chain(std::iter::repeat(' ')).take(width).collect();
        queue!(
            out,
            cursor::MoveTo(0, self.rows as u16),
            style::SetForegroundColor(STATUS_FG.term()),
            style::SetBackgroundColor(STATUS_BG.term()),
            style::Print(text),
            style::ResetColor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameOptions;
    use crate::mapper::{MapperConfig, PianoInputMapper};
    use std::time::Instant;

    #[test]
    fn field_reserves_a_status_row() {
        assert_eq!(Renderer::field_size(80, 25), (80, 48));
        assert_eq!(Renderer::field_size(10, 1), (10, 2));
    }

    #[test]
    fn render_emits_one_line_per_row() {
        let buf = PixelBuf::new(4, 6);
        let mut out = Vec::new();
        buf.render(&mut out, 3).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches('\u{2580}').count(), 12);
        assert_eq!(text.matches("\r\n").count(), 3);
    }

    fn draw_text(game: &Game, cols: usize, rows: usize) -> String {
        let mut renderer = Renderer::new(cols, rows);
        let mut out = Vec::new();
        renderer.draw(game, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn draws_every_phase_with_a_status_line() {
        let (pw, ph) = Renderer::field_size(80, 25);
        let mut game = Game::new(
            pw,
            ph,
            PianoInputMapper::new(MapperConfig::default()),
            None,
            GameOptions::default(),
        );
        let text = draw_text(&game, 80, 25);
        assert!(text.contains("SPACE to start"));
        assert!(text.contains("note mode: up=C down=G"));
        assert!(text.contains("tracking off"));

        game.start();
        game.tick(Instant::now());
        assert!(!draw_text(&game, 80, 25).contains("SPACE to start"));

        game.toggle_pause();
        assert!(draw_text(&game, 80, 25).contains("PAUSED"));
    }

    #[test]
    fn circle_stays_inside_buffer() {
        let mut buf = PixelBuf::new(8, 8);
        buf.fill_circle(0.0, 0.0, 3.0, WHITE);
        assert!(buf.get(0, 0) == WHITE);
        assert!(buf.get(7, 7) == SKY_TOP);
    }
}
