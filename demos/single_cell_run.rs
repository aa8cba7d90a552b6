extern crate xhm;

use chrono::NaiveDate;
use log::LevelFilter;

use xhm::cell::CellState;
use xhm::config::{AerodynamicConfig, RadiationConfig, SimulationConfig, SoilLayering, UnderstoryDefaults};
use xhm::clock::StepClock;
use xhm::forcing::{CellForcing, ForcingFrame};
use xhm::grid::{CellStatic, Direction8, Grid};
use xhm::libs::{MonthlyVegetation, SoilLib, SoilProperties, VegLib, VegProperties};
use xhm::outputs::InMemorySink;
use xhm::routing::ChannelGeometry;
use xhm::saturated::StreamGeometry;
use xhm::simulation::SimulationLoop;
use xhm::uh::{OutletUh, UhFingerprint, UhParams};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let static_cell = CellStatic {
        elevation_m: 100.0,
        flow_direction: Direction8::E,
        flow_accumulation: 1,
        is_stream: true,
        is_outlet: true,
        vegetation_class: 1,
        canopy_fraction: 0.4,
        soil_class: 1,
        latitude_deg: 45.0,
    };
    let static_grid = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(static_cell)]);

    let mut soil_lib = SoilLib::default();
    soil_lib.insert(
        1,
        SoilProperties {
            wilting_point: 0.1,
            field_capacity: 0.3,
            saturation: 0.45,
            residual: 0.05,
            k_sat: 0.01,
            porosity: 0.45,
            pore_size_index: 4.0,
            bubbling_pressure: 0.2,
            air_entry_head: 0.1,
            soil_thickness_m: 2.0,
        },
    );

    let mut monthly = [MonthlyVegetation::default(); 12];
    for m in monthly.iter_mut() {
        *m = MonthlyVegetation { lai: 3.0, albedo: 0.15, roughness_m: 1.0, displacement_m: 6.0 };
    }
    let mut veg_lib = VegLib::default();
    veg_lib.insert(
        1,
        VegProperties {
            overstory_present: true,
            min_stomatal_resistance_s_m: 100.0,
            max_stomatal_resistance_s_m: 5000.0,
            monthly,
            canopy_top_m: 18.0,
            canopy_bottom_m: 8.0,
            extinction_coefficient: 0.5,
            rarc_undocumented_unit: 0.0,
        },
    );

    let stream_geometry = Grid::new(
        1,
        1,
        100.0,
        0.0,
        0.0,
        vec![Some(StreamGeometry { reach_length_m: 100.0, reach_width_m: 5.0, stream_depth_m: 1.0 })],
    );
    let channel_geometry = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(ChannelGeometry { k_per_h: 0.2 })]);

    let params = UhParams {
        velocity_avg_m_h: 1.0,
        velocity_min_m_h: 0.1,
        velocity_max_m_h: 5.0,
        slope_exponent_b: 0.3,
        area_exponent_c: 0.2,
        step_time_hours: 24.0,
        reservoir_fraction_beta: 0.5,
    };
    let outlet_uh = OutletUh {
        outlet_row: 0,
        outlet_col: 0,
        mask: vec![true],
        ordinates: [((0usize, 0usize), vec![1.0 / params.step_time_hours])].into_iter().collect(),
        fingerprint: UhFingerprint::new(&params),
    };

    let config = SimulationConfig {
        radiation: RadiationConfig { angstrom_a: 0.25, angstrom_b: 0.5, radiation_threshold_kj_m2_h: 360.0, ground_albedo: 0.2 },
        aerodynamic: AerodynamicConfig { obs_height_m: 10.0, ground_displacement_m: 0.0, ground_roughness_m: 0.01, reference_height_above_canopy_m: 2.0 },
        understory: UnderstoryDefaults::default(),
        soil_layering: SoilLayering { upper_layer_thickness_m: 0.3 },
        reservoir_fraction_beta: 0.5,
    };

    let initial_state = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(CellState::spin_up(0.5, 0.3, 0.25))]);
    let start = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
    let clock = StepClock::new(start, 24);

    let mut model = SimulationLoop::new(static_grid, soil_lib, veg_lib, stream_geometry, channel_geometry, vec![outlet_uh], config, clock, initial_state);

    let forcings: Vec<ForcingFrame> = (0..10)
        .map(|day| {
            let forcing = CellForcing {
                precipitation_m: if day < 3 { 0.02 } else { 0.0 },
                temp_min_c: 12.0,
                temp_avg_c: 18.0,
                temp_max_c: 24.0,
                wind_speed_m_s: 2.0,
                relative_humidity_pct: 65.0,
                pressure_kpa: 101.0,
                sunshine_h: 9.0,
            };
            ForcingFrame::new(1, 1, vec![Some(forcing)])
        })
        .collect();

    let mut sink = InMemorySink::default();
    model.run(&forcings, &mut sink, || false)?;

    for (_, _, step, discharge) in &sink.outlet_discharge {
        log::info!("step {step}: outlet discharge = {discharge:.6} m3/h");
    }
    Ok(())
}
