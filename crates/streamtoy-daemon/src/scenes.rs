//! Built-in diagnostic scenes.

use crate::grid::{TilePos, COLS};
use crate::input::InputEvent;
use crate::led::{create_animation, SegmentColors, ANIMATION_NAMES, RGB8};
use crate::render::{parse_color, to_led, TextStyle};
use crate::runtime::{Scene, SceneContext, SceneRegistry};
use crate::Result;
use std::time::Duration;
use streamtoy_hw::Segment;
use tracing::info;

pub const BUTTON_TEST: &str = "button_test";
pub const LED_TEST: &str = "led_test";

/// Registry holding every built-in scene.
pub fn builtin_registry() -> SceneRegistry {
    let mut registry = SceneRegistry::new();
    registry.register(BUTTON_TEST, || Box::new(ButtonTest) as Box<dyn Scene>);
    registry.register(LED_TEST, || Box::new(LedTest::default()) as Box<dyn Scene>);
    registry
}

fn label_style(bg: &str) -> TextStyle {
    TextStyle {
        font_size: 28.0,
        bg: bg.to_string(),
        ..TextStyle::default()
    }
}

fn show_text(ctx: &SceneContext, pos: TilePos, text: &str, style: &TextStyle) -> Result<()> {
    let tile = ctx.render.text_tile(text, style)?;
    ctx.display
        .set_tile(pos.row as usize, pos.col as usize, &tile.path, &tile.cache_key)
}

const WHITE: RGB8 = RGB8 {
    r: 255,
    g: 255,
    b: 255,
};

/// Labels every key with its coordinates and lights up on press.
///
/// A long press moves on to the LED test.
pub struct ButtonTest;

impl ButtonTest {
    fn label(pos: TilePos) -> String {
        format!("{},{}", pos.row, pos.col)
    }
}

impl Scene for ButtonTest {
    fn on_enter(&mut self, ctx: &SceneContext) -> Result<()> {
        let style = label_style("black");
        for pos in TilePos::all() {
            show_text(ctx, pos, &Self::label(pos), &style)?;
        }
        ctx.display.submit();

        ctx.display.set_background_led_animation(Box::new(SegmentColors::new(vec![
            (Segment::BackLeft, RGB8 { r: 255, g: 0, b: 0 }),
            (Segment::Left, RGB8 { r: 255, g: 160, b: 0 }),
            (Segment::Front, RGB8 { r: 0, g: 255, b: 0 }),
            (Segment::Right, RGB8 { r: 0, g: 160, b: 255 }),
            (Segment::BackRight, RGB8 { r: 160, g: 0, b: 255 }),
        ])));
        Ok(())
    }

    fn on_input(&mut self, ctx: &SceneContext, event: InputEvent) -> Result<()> {
        let pos = TilePos {
            row: event.row,
            col: event.col,
        };

        if event.pressed {
            show_text(ctx, pos, &Self::label(pos), &label_style("blue"))?;
            ctx.display.run_led_animation(
                create_animation("comet", WHITE)?,
                Some(Duration::from_millis(600)),
            );
        } else if event.long_press {
            info!("Long press on {}, switching to LED test", pos);
            ctx.request_scene(LED_TEST);
            return Ok(());
        } else {
            show_text(ctx, pos, &Self::label(pos), &label_style("black"))?;
        }
        ctx.display.submit();
        Ok(())
    }
}

/// One key per built-in LED animation; the last key returns to the button
/// test.
#[derive(Default)]
pub struct LedTest {
    selected: Option<usize>,
}

impl LedTest {
    const PALETTE: [&'static str; 4] = ["white", "red", "green", "blue"];

    fn back() -> TilePos {
        TilePos {
            row: 2,
            col: COLS as u8 - 1,
        }
    }

    fn draw(&self, ctx: &SceneContext, index: usize) -> Result<()> {
        let pos = TilePos::all().nth(index).unwrap_or_else(Self::back);
        let bg = if self.selected == Some(index) {
            "green"
        } else {
            "black"
        };
        let style = TextStyle {
            font_size: 20.0,
            ..label_style(bg)
        };
        show_text(ctx, pos, ANIMATION_NAMES[index], &style)
    }
}

impl Scene for LedTest {
    fn on_enter(&mut self, ctx: &SceneContext) -> Result<()> {
        for index in 0..ANIMATION_NAMES.len() {
            self.draw(ctx, index)?;
        }
        show_text(ctx, Self::back(), "back", &label_style("gray"))?;
        for pos in TilePos::all().skip(ANIMATION_NAMES.len()) {
            if pos != Self::back() {
                let blank = ctx.render.solid_tile("black")?;
                ctx.display
                    .set_tile(pos.row as usize, pos.col as usize, &blank.path, &blank.cache_key)?;
            }
        }
        ctx.display.submit();
        Ok(())
    }

    fn on_input(&mut self, ctx: &SceneContext, event: InputEvent) -> Result<()> {
        if event.pressed {
            return Ok(());
        }
        let pos = TilePos {
            row: event.row,
            col: event.col,
        };
        if event.long_press || pos == Self::back() {
            ctx.request_scene(BUTTON_TEST);
            return Ok(());
        }

        let index = pos.index();
        let Some(name) = ANIMATION_NAMES.get(index) else {
            return Ok(());
        };
        let color = parse_color(Self::PALETTE[index % Self::PALETTE.len()])?;
        ctx.display
            .set_background_led_animation(create_animation(name, to_led(color))?);
        info!("Background LED animation set to {}", name);

        let previous = self.selected.replace(index);
        if let Some(previous) = previous {
            self.draw(ctx, previous)?;
        }
        self.draw(ctx, index)?;
        ctx.display.submit();
        Ok(())
    }
}
