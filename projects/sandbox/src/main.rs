mod demo_rig;

use std::{cell::RefCell, path::PathBuf, rc::Rc, time::Instant};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use gengine::{
    game::animation::AnimationPlayer,
    main::{
        gpu::{recording::RecordingDevice, wgpu_device::WgpuDevice, RenderDevice},
        passes::{AtmospherePass, IblPass, LtcPass, LtcTables, PbrPass, SkinnedMeshPass, SkyboxPass},
    },
    Engine, EngineConfig,
};
use glam::Vec3;
use log::{info, warn};

use demo_rig::DemoRig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scene {
    /// skybox, image based lighting and the skinned arm
    Ibl,
    Atmosphere,
    Ltc,
    All,
}

#[derive(Debug, Parser)]
#[command(name = "sandbox", about = "Runs the gengine pass chain off-screen")]
struct Args {
    /// JSON engine config, defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, default_value_t = 120)]
    frames: u32,
    /// record draws instead of opening a GPU device
    #[arg(long)]
    dry_run: bool,
    #[arg(long, value_enum, default_value_t = Scene::All)]
    scene: Scene,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .init();

    let [width, height] = config.frame_size;
    if args.dry_run {
        let engine = run(Engine::new(config, RecordingDevice::new(width, height)), &args)?;
        info!("recorded {} draws", engine.device().draws().count());
    } else {
        let device = WgpuDevice::new_headless(width, height, config.shader_dir.clone())?;
        run(Engine::new(config, device), &args)?;
    }
    Ok(())
}

fn run<D: RenderDevice>(mut engine: Engine<D>, args: &Args) -> anyhow::Result<Engine<D>> {
    let rig = DemoRig::new()?;
    info!("demo rig has {} bones", rig.skinning.borrow().bone_count);
    let player = Rc::new(RefCell::new(
        AnimationPlayer::with_clip(rig.idle.clone())
            .with_blend_duration(engine.config().blend_duration_ticks),
    ));

    let config = engine.config().clone();
    let ibl = matches!(args.scene, Scene::Ibl | Scene::All);
    if ibl {
        let probe = demo_rig::probe_mesh(engine.device_mut(), Vec3::new(1.5, 0.5, 0.0))?;
        let arm = demo_rig::arm_mesh(engine.device_mut())?;
        engine.register_pass(SkyboxPass::desc(), SkyboxPass::default());
        engine.register_pass(IblPass::desc(), IblPass::new(config.ibl_sizes()));
        engine.register_pass(PbrPass::desc(), PbrPass::new(probe));
        engine.register_pass(SkinnedMeshPass::desc(), SkinnedMeshPass::new(player.clone(), arm));
    }
    if matches!(args.scene, Scene::Atmosphere | Scene::All) {
        engine.register_pass(
            AtmospherePass::desc(),
            AtmospherePass::new(config.atmosphere_scattering_orders),
        );
    }
    if matches!(args.scene, Scene::Ltc | Scene::All) {
        engine.register_pass(LtcPass::desc(), LtcPass::new(LtcTables::identity()));
    }

    engine.camera_mut().eye = Vec3::new(0.0, 1.5, 5.0);
    engine.camera_mut().target = Vec3::new(0.0, 1.0, 0.0);
    let failed = engine.init();
    if failed > 0 {
        warn!("{} passes failed to initialise", failed);
    }

    let started = Instant::now();
    let mut last = started;
    for frame in 0..args.frames {
        if ibl && frame == args.frames / 2 {
            if let Err(e) = player
                .borrow_mut()
                .play_blended_animation(rig.idle.clone(), rig.wave.clone())
            {
                warn!("could not blend to wave: {}", e);
            }
        }
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;

        let stats = engine.frame(dt);
        if stats.failed > 0 {
            warn!("frame {}: {} passes failed", frame, stats.failed);
        }
    }
    info!(
        "ran {} frames in {:.2?}, tick order {:?}",
        args.frames,
        started.elapsed(),
        engine.scheduler().tick_order()
    );
    Ok(engine)
}
