//! Bird motion, pipes, and the practice-mode bounce rules.
//!
//! Coordinates are half-block pixels: `x` grows to the right, `y` grows
//! downwards, the ceiling is `y = 0` and the ground is `y = ground_y`.

use std::time::{Duration, Instant};

use crate::mapper::ActionState;

/// Distance kept between the bird and a surface it was pushed out of.
const EDGE_GAP: f64 = 0.5;

/// Gameplay constants in screen-independent units. Lengths and speeds are
/// multiplied by the screen scale (`pixel_height / 48`) to get pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicsTuning {
    pub gravity: f64,
    pub up_thrust: f64,
    pub down_thrust: f64,
    pub max_velocity: f64,
    /// Applied to vertical velocity every frame.
    pub drag: f64,
    /// Share of speed kept after hitting a surface in practice mode.
    pub bounce_damping: f64,
    pub side_impulse: f64,
    pub horizontal_drag: f64,
    /// Frames between pipes at speed 1.0.
    pub spawn_period: u32,
    pub gate_timeout_ms: u64,
    /// Vertical travel from the contact point that frees the scroll gate.
    pub clearance: f64,
}

impl Default for PhysicsTuning {
    fn default() -> Self {
        Self {
            gravity: 0.15,
            up_thrust: -0.45,
            down_thrust: 0.45,
            max_velocity: 2.2,
            drag: 0.96,
            bounce_damping: 0.6,
            side_impulse: 1.8,
            horizontal_drag: 0.85,
            spawn_period: 45,
            gate_timeout_ms: 1500,
            clearance: 6.0,
        }
    }
}

/// Tuning resolved against a concrete screen size.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicsParams {
    pub scale: f64,
    pub gravity: f64,
    pub up_thrust: f64,
    pub down_thrust: f64,
    pub max_velocity: f64,
    pub drag: f64,
    pub bounce_damping: f64,
    pub side_impulse: f64,
    pub horizontal_drag: f64,
    pub rest_epsilon: f64,
    pub base_speed: f64,
    pub spawn_period: u32,
    pub pipe_width: f64,
    pub pipe_gap: f64,
    pub gap_margin: f64,
    pub gate_timeout: Duration,
    pub clearance: f64,
    pub bird_radius: f64,
    pub ground_height: f64,
}

impl PhysicsParams {
    pub fn for_screen(pw: usize, ph: usize, tuning: &PhysicsTuning) -> Self {
        let scale = ph as f64 / 48.0;
        Self {
            scale,
            gravity: tuning.gravity * scale,
            up_thrust: tuning.up_thrust * scale,
            down_thrust: tuning.down_thrust * scale,
            max_velocity: tuning.max_velocity.abs() * scale,
            drag: tuning.drag.clamp(0.0, 0.999),
            bounce_damping: tuning.bounce_damping.clamp(0.0, 0.999),
            side_impulse: tuning.side_impulse * scale,
            horizontal_drag: tuning.horizontal_drag.clamp(0.0, 0.999),
            rest_epsilon: 0.05 * scale,
            base_speed: 1.1 * (pw as f64 / 80.0).max(0.8),
            spawn_period: tuning.spawn_period.max(1),
            pipe_width: (8.0 * scale).clamp(5.0, 14.0),
            pipe_gap: (18.0 * scale).max(12.0),
            gap_margin: 3.0 * scale,
            gate_timeout: Duration::from_millis(tuning.gate_timeout_ms),
            clearance: tuning.clearance * scale,
            bird_radius: (2.0 * scale).max(1.5),
            ground_height: (8.0 * scale).max(6.0).floor(),
        }
    }

    /// Frames between spawns at the given speed multiplier.
    pub fn spawn_interval(&self, speed: f64) -> u64 {
        ((self.spawn_period as f64 / speed).floor() as u64).max(1)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bird {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub radius: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pipe {
    pub id: u64,
    pub x: f64,
    pub top_height: f64,
    pub bottom_y: f64,
    pub scored: bool,
    /// Set once this pipe has held the scroll gate.
    gated: bool,
}

impl Pipe {
    pub fn new(id: u64, x: f64, top_height: f64, bottom_y: f64) -> Self {
        Self {
            id,
            x,
            top_height,
            bottom_y,
            scored: false,
            gated: false,
        }
    }
}

/// The pipe the bird is stuck against while the world is not scrolling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionContact {
    pub pipe_id: u64,
    pub contact_y: f64,
    pub at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Flying,
    Crashed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateRelease {
    Timeout,
    InGap,
    Cleared,
    PipeGone,
}

struct GapRng(u64);

impl GapRng {
    fn next_unit(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bits = (self.0 >> 33) ^ self.0;
        (bits % 1000) as f64 / 1000.0
    }
}

pub struct World {
    params: PhysicsParams,
    width: f64,
    ground_y: f64,
    rest_x: f64,
    bird: Bird,
    pipes: Vec<Pipe>,
    contact: Option<CollisionContact>,
    scroll_frames: u64,
    scroll_x: f64,
    next_pipe_id: u64,
    passed: u32,
    rng: GapRng,
}

impl World {
    pub fn new(pw: usize, ph: usize, tuning: &PhysicsTuning, seed: u64) -> Self {
        let params = PhysicsParams::for_screen(pw, ph, tuning);
        let ground_y = (ph as f64 - params.ground_height).max(params.bird_radius * 4.0);
        let rest_x = (pw as f64 * 0.22).max(10.0);
        let bird = Bird {
            x: rest_x,
            y: ground_y * 0.4,
            vx: 0.0,
            vy: 0.0,
            radius: params.bird_radius,
        };
        Self {
            params,
            width: pw as f64,
            ground_y,
            rest_x,
            bird,
            pipes: Vec::new(),
            contact: None,
            scroll_frames: 0,
            scroll_x: 0.0,
            next_pipe_id: 0,
            passed: 0,
            rng: GapRng(seed),
        }
    }

    pub fn params(&self) -> &PhysicsParams {
        &self.params
    }

    pub fn bird(&self) -> &Bird {
        &self.bird
    }

    pub fn bird_mut(&mut self) -> &mut Bird {
        &mut self.bird
    }

    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    pub fn ground_y(&self) -> f64 {
        self.ground_y
    }

    pub fn rest_x(&self) -> f64 {
        self.rest_x
    }

    pub fn scroll_x(&self) -> f64 {
        self.scroll_x
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }

    pub fn contact(&self) -> Option<&CollisionContact> {
        self.contact.as_ref()
    }

    pub fn scroll_enabled(&self) -> bool {
        self.contact.is_none()
    }

    /// Places a pipe directly, bypassing the spawner.
    pub fn insert_pipe(&mut self, x: f64, top_height: f64, bottom_y: f64) -> u64 {
        let id = self.next_pipe_id;
        self.next_pipe_id += 1;
        self.pipes.push(Pipe::new(id, x, top_height, bottom_y));
        id
    }

    /// One frame of play.
    pub fn step(
        &mut self,
        input: ActionState,
        speed: f64,
        practice: bool,
        now: Instant,
    ) -> StepOutcome {
        self.integrate_thrust(input, speed);
        self.decay_horizontal(speed);
        if self.scroll_enabled() {
            self.advance_obstacles(speed);
        }

        // A gate left over from practice mode still has to open.
        if !practice {
            self.release_scroll_gate(now);
            return if self.bird_overlaps_anything() {
                StepOutcome::Crashed
            } else {
                StepOutcome::Flying
            };
        }

        self.resolve_practice_collisions(now);
        self.release_scroll_gate(now);
        StepOutcome::Flying
    }

    pub fn integrate_thrust(&mut self, input: ActionState, speed: f64) {
        let p = &self.params;
        let b = &mut self.bird;
        if input.up {
            b.vy += p.up_thrust;
        }
        if input.down {
            b.vy += p.down_thrust;
        }
        if !input.up && !input.down {
            b.vy += p.gravity * speed;
        }
        b.vy = b.vy.clamp(-p.max_velocity, p.max_velocity) * p.drag;
        b.y += b.vy * speed;
    }

    fn decay_horizontal(&mut self, speed: f64) {
        let p = &self.params;
        let b = &mut self.bird;
        if b.vx == 0.0 {
            return;
        }
        b.x += b.vx * speed;
        b.vx *= p.horizontal_drag;
        if b.vx.abs() < p.rest_epsilon {
            b.vx = 0.0;
            b.x = self.rest_x;
        }
    }

    fn advance_obstacles(&mut self, speed: f64) {
        if self.scroll_frames % self.params.spawn_interval(speed) == 0 {
            self.spawn_pipe();
        }
        self.scroll_frames += 1;

        let dx = self.params.base_speed * speed;
        self.scroll_x += dx;
        let pw = self.params.pipe_width;
        for pipe in &mut self.pipes {
            pipe.x -= dx;
            if !pipe.scored && pipe.x + pw < self.bird.x {
                pipe.scored = true;
                self.passed += 1;
            }
        }
        self.pipes.retain(|p| p.x + pw > 0.0);
    }

    fn spawn_pipe(&mut self) {
        let p = &self.params;
        let range = (self.ground_y - p.pipe_gap - p.gap_margin * 2.0).max(0.0);
        let top = p.gap_margin + self.rng.next_unit() * range;
        let bottom = top + p.pipe_gap;
        let x = self.width + 2.0;
        self.insert_pipe(x, top, bottom);
    }

    /// Normal-mode check: does the bird touch ground, ceiling or a pipe?
    pub fn bird_overlaps_anything(&self) -> bool {
        let b = &self.bird;
        if b.y + b.radius >= self.ground_y || b.y - b.radius < 0.0 {
            return true;
        }
        self.pipes.iter().any(|pipe| {
            let (top, bottom) = self.pipe_hits(pipe);
            top || bottom
        })
    }

    fn pipe_hits(&self, pipe: &Pipe) -> (bool, bool) {
        let b = &self.bird;
        let right = pipe.x + self.params.pipe_width;
        let top = circle_hits_rect(b.x, b.y, b.radius, pipe.x, f64::NEG_INFINITY, right, pipe.top_height);
        let bottom = circle_hits_rect(b.x, b.y, b.radius, pipe.x, pipe.bottom_y, right, f64::INFINITY);
        (top, bottom)
    }

    /// Practice-mode bounces off the screen bounds and pipes.
    pub fn resolve_practice_collisions(&mut self, now: Instant) {
        let damping = self.params.bounce_damping;
        let r = self.bird.radius;

        if self.bird.y + r > self.ground_y {
            self.bird.y = self.ground_y - r;
            self.bird.vy = -self.bird.vy.abs() * damping;
        } else if self.bird.y - r < 0.0 {
            self.bird.y = r;
            self.bird.vy = self.bird.vy.abs() * damping;
        }

        let mut touched = Vec::new();
        for i in 0..self.pipes.len() {
            let (hits_top, hits_bottom) = self.pipe_hits(&self.pipes[i]);
            if !hits_top && !hits_bottom {
                continue;
            }
            let pipe = &self.pipes[i];
            let b = &mut self.bird;
            if b.x < pipe.x {
                b.x = pipe.x - r - EDGE_GAP;
                b.vx = -self.params.side_impulse * damping;
            } else if hits_top {
                b.y = pipe.top_height + r + EDGE_GAP;
                b.vy = b.vy.abs() * damping;
            } else {
                b.y = pipe.bottom_y - r - EDGE_GAP;
                b.vy = -b.vy.abs() * damping;
            }
            touched.push(pipe.id);
        }

        for id in touched {
            if self.gate_scroll(id, now) {
                break;
            }
        }
    }

    /// Records a contact unless one is already held or this pipe has
    /// already gated once. Returns `true` if the gate closed.
    fn gate_scroll(&mut self, pipe_id: u64, now: Instant) -> bool {
        if self.contact.is_some() {
            return false;
        }
        let Some(pipe) = self.pipes.iter_mut().find(|p| p.id == pipe_id) else {
            return false;
        };
        if pipe.gated {
            return false;
        }
        pipe.gated = true;
        self.contact = Some(CollisionContact {
            pipe_id,
            contact_y: self.bird.y,
            at: now,
        });
        log::debug!(target: "physics", "scroll gated on pipe {pipe_id}");
        true
    }

    /// Frees the scroll gate if any release condition holds.
    pub fn release_scroll_gate(&mut self, now: Instant) -> Option<GateRelease> {
        let contact = self.contact?;
        let b = &self.bird;
        let reason = match self.pipes.iter().find(|p| p.id == contact.pipe_id) {
            None => Some(GateRelease::PipeGone),
            Some(_) if now.duration_since(contact.at) >= self.params.gate_timeout => {
                Some(GateRelease::Timeout)
            }
            Some(pipe) if b.y - b.radius >= pipe.top_height && b.y + b.radius <= pipe.bottom_y => {
                Some(GateRelease::InGap)
            }
            Some(_) if (b.y - contact.contact_y).abs() > self.params.clearance => {
                Some(GateRelease::Cleared)
            }
            Some(_) => None,
        };
        if let Some(reason) = reason {
            self.contact = None;
            log::debug!(target: "physics", "scroll resumed: {reason:?}");
        }
        reason
    }

    /// Idle bobbing on the title screen.
    pub fn hover(&mut self, frame: u64) {
        self.bird.y = self.ground_y * 0.4 + (frame as f64 * 0.08).sin() * 3.0 * self.params.scale;
        self.scroll_x += 0.5;
    }

    /// Death fall. Returns `true` once the bird lies on the ground.
    pub fn fall(&mut self) -> bool {
        let b = &mut self.bird;
        b.vy = (b.vy + self.params.gravity).min(self.params.max_velocity);
        b.y += b.vy;
        let floor = self.ground_y - b.radius;
        if b.y >= floor {
            b.y = floor;
            return true;
        }
        false
    }
}

fn circle_hits_rect(cx: f64, cy: f64, r: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> bool {
    if x0 > x1 || y0 > y1 {
        return false;
    }
    let nx = cx.clamp(x0, x1);
    let ny = cy.clamp(y0, y1);
    let (dx, dy) = (cx - nx, cy - ny);
    dx * dx + dy * dy < r * r
}

#[cfg(test)]
mod tests {
    use super::*;

    const UP: ActionState = ActionState { up: true, down: false };
    const DOWN: ActionState = ActionState { up: false, down: true };
    const NONE: ActionState = ActionState { up: false, down: false };

    fn world() -> World {
        World::new(80, 48, &PhysicsTuning::default(), 7)
    }

    #[test]
    fn velocity_stays_clamped_for_any_input_sequence() {
        let mut w = world();
        let inputs = [UP, DOWN, NONE, ActionState { up: true, down: true }];
        let mut seed = 12345u64;
        for _ in 0..5000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let input = inputs[(seed >> 40) as usize % inputs.len()];
            let speed = 0.5 + ((seed >> 20) % 16) as f64 * 0.1;
            w.integrate_thrust(input, speed);
            assert!(w.bird().vy.abs() <= w.params().max_velocity + 1e-9);
            w.bird_mut().y = 20.0;
        }
    }

    #[test]
    fn gravity_pulls_down_and_thrust_pushes_up() {
        let mut w = world();
        w.integrate_thrust(NONE, 1.0);
        assert!(w.bird().vy > 0.0);
        for _ in 0..5 {
            w.integrate_thrust(UP, 1.0);
        }
        assert!(w.bird().vy < 0.0);
    }

    #[test]
    fn ground_contact_clamps_and_reflects() {
        let mut w = world();
        let ground = w.ground_y();
        let r = w.bird().radius;
        w.bird_mut().y = ground + 1.0;
        w.bird_mut().vy = 1.5;
        w.resolve_practice_collisions(Instant::now());
        assert_eq!(w.bird().y, ground - r);
        assert!((w.bird().vy + 1.5 * w.params().bounce_damping).abs() < 1e-9);
    }

    #[test]
    fn ceiling_contact_reflects_downwards() {
        let mut w = world();
        w.bird_mut().y = -1.0;
        w.bird_mut().vy = -2.0;
        w.resolve_practice_collisions(Instant::now());
        assert_eq!(w.bird().y, w.bird().radius);
        assert!(w.bird().vy > 0.0);
    }

    #[test]
    fn normal_mode_ends_on_ground() {
        let mut w = world();
        let ground = w.ground_y();
        w.bird_mut().y = ground;
        assert!(w.bird_overlaps_anything());
        assert_eq!(w.step(NONE, 1.0, false, Instant::now()), StepOutcome::Crashed);
    }

    #[test]
    fn side_hit_pushes_back_and_gates_scroll() {
        let mut w = world();
        let now = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        // Gap far below the bird, leading edge just inside its radius.
        let id = w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(now);

        assert!(w.bird().x < x);
        assert!(w.bird().vx < 0.0);
        let contact = w.contact().copied().unwrap();
        assert_eq!(contact.pipe_id, id);
        assert!(!w.scroll_enabled());
    }

    #[test]
    fn continuous_contact_keeps_first_timestamp() {
        let mut w = world();
        let t0 = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(t0);
        w.bird_mut().x = x;
        w.resolve_practice_collisions(t0 + Duration::from_millis(400));
        assert_eq!(w.contact().unwrap().at, t0);
    }

    #[test]
    fn gate_holds_until_timeout() {
        let mut w = world();
        let t0 = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(t0);

        let timeout = w.params().gate_timeout;
        for ms in (0..timeout.as_millis() as u64).step_by(100) {
            assert_eq!(w.release_scroll_gate(t0 + Duration::from_millis(ms)), None);
            assert!(!w.scroll_enabled());
        }
        assert_eq!(w.release_scroll_gate(t0 + timeout), Some(GateRelease::Timeout));
        assert!(w.scroll_enabled());
    }

    #[test]
    fn gate_releases_when_bird_enters_gap() {
        let mut w = world();
        let t0 = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(t0);

        // A small move that stays outside the gap and within clearance.
        w.bird_mut().y = y + 1.0;
        assert_eq!(w.release_scroll_gate(t0), None);

        w.bird_mut().y = y + 4.0 + r + 1.0;
        assert_eq!(w.release_scroll_gate(t0), Some(GateRelease::InGap));
    }

    #[test]
    fn gate_releases_after_vertical_clearance() {
        let mut w = world();
        let t0 = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(t0);

        let clearance = w.params().clearance;
        w.bird_mut().y = y - clearance - 0.1;
        assert_eq!(w.release_scroll_gate(t0), Some(GateRelease::Cleared));
        assert!(w.contact().is_none());
    }

    #[test]
    fn gate_times_out_after_leaving_practice() {
        let mut w = world();
        let t0 = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(t0);
        assert!(!w.scroll_enabled());
        assert!(w.bird().vx < 0.0);

        let scroll_before = w.scroll_x();
        for i in 0..300u64 {
            w.step(NONE, 1.0, false, t0 + Duration::from_millis(33 * i));
            w.bird_mut().y = y;
            w.bird_mut().vy = 0.0;
        }

        assert!(w.scroll_enabled());
        assert!(w.contact().is_none());
        assert!(w.scroll_x() > scroll_before);
        assert_eq!(w.bird().vx, 0.0);
        assert_eq!(w.bird().x, w.rest_x());
    }

    #[test]
    fn a_pipe_gates_only_once() {
        let mut w = world();
        let t0 = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(t0);
        w.release_scroll_gate(t0 + Duration::from_secs(5));

        w.bird_mut().x = x;
        w.resolve_practice_collisions(t0 + Duration::from_secs(6));
        assert!(w.scroll_enabled());
    }

    #[test]
    fn bounce_decays_back_to_rest() {
        let mut w = world();
        let rest = w.rest_x();
        w.bird_mut().vx = -3.0;
        for _ in 0..200 {
            w.decay_horizontal(1.0);
        }
        assert_eq!(w.bird().vx, 0.0);
        assert_eq!(w.bird().x, rest);
    }

    #[test]
    fn spawner_respects_speed_and_scroll_gate() {
        let mut w = world();
        let interval = w.params().spawn_interval(2.0);
        assert_eq!(interval, (w.params().spawn_period as f64 / 2.0).floor() as u64);
        for _ in 0..interval {
            w.advance_obstacles(2.0);
        }
        assert_eq!(w.pipes().len(), 1);
        w.advance_obstacles(2.0);
        assert_eq!(w.pipes().len(), 2);

        for p in w.pipes() {
            assert!(p.top_height >= w.params().gap_margin - 1e-9);
            assert!(p.bottom_y <= w.ground_y() - w.params().gap_margin + 1e-9);
            assert!((p.bottom_y - p.top_height - w.params().pipe_gap).abs() < 1e-9);
        }
    }

    #[test]
    fn gated_world_does_not_scroll() {
        let mut w = world();
        let t0 = Instant::now();
        let (x, y, r) = (w.bird().x, w.bird().y, w.bird().radius);
        let id = w.insert_pipe(x + r - 0.5, y + 4.0, y + 30.0);
        w.resolve_practice_collisions(t0);
        let pipe_x = w.pipes()[0].x;

        w.step(NONE, 1.0, true, t0 + Duration::from_millis(33));
        let pipe = w.pipes().iter().find(|p| p.id == id).unwrap();
        assert_eq!(pipe.x, pipe_x);
    }

    #[test]
    fn pipes_leave_and_score() {
        let mut w = world();
        let id = w.insert_pipe(w.bird().x + 1.0, 5.0, 40.0);
        for _ in 0..200 {
            w.advance_obstacles(1.0);
        }
        assert!(w.pipes().iter().all(|p| p.id != id));
        assert!(w.passed() >= 1);
    }

    #[test]
    fn fall_lands_on_ground() {
        let mut w = world();
        let mut frames = 0;
        while !w.fall() {
            frames += 1;
            assert!(frames < 1000);
        }
        assert_eq!(w.bird().y, w.ground_y() - w.bird().radius);
    }
}
