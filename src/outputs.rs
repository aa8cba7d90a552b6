//! Every per-cell-per-step quantity the core produces, plus the [`OutputSink`] boundary the
//! raster/text writer collaborator layer implements. Field names follow the variable list in the
//! external interface (Rs, L_sky, Rno, Rnu, Ep, EI_o, EI_u, ...).

use std::path::Path;

use csv::Writer;

use crate::error::OutputIoError;

/// Every quantity [`crate::simulation::SimulationLoop`] produces for one cell at one step.
/// A raster-stack writer collaborator owns turning a time series of these into the per-variable
/// output stacks described in the external interface; this crate only produces the values.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepOutputs {
    /// Rs: sky shortwave radiation (kJ/m2/h)
    pub sky_shortwave_kj_m2_h: f64,
    /// L_sky: sky longwave radiation (kJ/m2/h)
    pub sky_longwave_kj_m2_h: f64,
    /// Rno: net overstory radiation (kJ/m2/h)
    pub net_overstory_kj_m2_h: f64,
    /// Rnu: net understory radiation (kJ/m2/h)
    pub net_understory_kj_m2_h: f64,
    /// Ep: potential evaporation (m/h)
    pub potential_evaporation_m_h: f64,
    /// EI_o: overstory interception evaporation (m)
    pub interception_evap_overstory_m: f64,
    /// EI_u: understory interception evaporation (m)
    pub interception_evap_understory_m: f64,
    /// ET_o: overstory transpiration (m)
    pub transpiration_overstory_m: f64,
    /// ET_u: understory transpiration (m)
    pub transpiration_understory_m: f64,
    /// ET_s: bare-soil evaporation (m)
    pub soil_evaporation_m: f64,
    /// Interception_o: overstory canopy storage at the end of the step (m)
    pub interception_overstory_m: f64,
    /// Interception_u: understory canopy storage at the end of the step (m)
    pub interception_understory_m: f64,
    /// SM_Upper: upper-layer soil moisture fraction at the end of the step
    pub sm_upper: f64,
    /// SM_Lower: lower-layer soil moisture fraction at the end of the step
    pub sm_lower: f64,
    /// SW_Infiltration
    pub infiltration_m: f64,
    /// SW_Percolation_Upper
    pub percolation_upper_m: f64,
    /// SW_Percolation_Lower
    pub percolation_lower_m: f64,
    /// SW_Run_Infil: infiltration-excess surface runoff (m)
    pub infiltration_excess_runoff_m: f64,
    /// SW_Run_Satur: saturation-excess surface runoff (m)
    pub saturation_excess_runoff_m: f64,
    /// SW_SUB_Qin: subsurface lateral inflow aggregated at the start of the step (m3/h)
    pub sub_q_in_m3_h: f64,
    /// SW_SUB_Qout: subsurface lateral outflow computed this step (m3/h)
    pub sub_q_out_m3_h: f64,
    /// SW_SUB_z: water-table depth at the end of the step (m)
    pub water_table_depth_m: f64,
    /// SW_SUB_rise_upper: groundwater rise refilling the upper layer (m)
    pub rise_to_upper_m: f64,
    /// SW_SUB_rise_lower: groundwater rise refilling the lower layer (m)
    pub rise_to_lower_m: f64,
    /// SW_SUB_rf: return flow emerging at the surface (m)
    pub return_flow_m: f64,
    /// SW_SUB_Qc: cell-to-stream baseflow exchange, positive cell-to-stream (m3/h)
    pub stream_exchange_m3_h: f64,
    /// Q_Channel: channel discharge at this cell, only meaningful on stream cells (m3/h)
    pub channel_discharge_m3_h: f64,
}

/// The boundary a result-writing collaborator implements. The core calls these at step
/// boundaries only; no partial step is ever recorded (see the error-handling design).
pub trait OutputSink {
    fn record_cell(&mut self, row: usize, col: usize, step: usize, outputs: &StepOutputs);
    fn record_outlet_discharge(&mut self, outlet_row: usize, outlet_col: usize, step: usize, discharge_m3_h: f64);
}

/// Discards every record. Useful when a run only needs outlet discharge, or in tests that only
/// check final state.
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn record_cell(&mut self, _row: usize, _col: usize, _step: usize, _outputs: &StepOutputs) {}
    fn record_outlet_discharge(&mut self, _row: usize, _col: usize, _step: usize, _discharge_m3_h: f64) {}
}

/// Keeps every record in memory, row-major per step. Intended for tests and short runs; a real
/// deployment's raster-stack writer is a separate collaborator.
#[derive(Debug, Default)]
pub struct InMemorySink {
    pub cells: Vec<(usize, usize, usize, StepOutputs)>,
    pub outlet_discharge: Vec<(usize, usize, usize, f64)>,
}

impl OutputSink for InMemorySink {
    fn record_cell(&mut self, row: usize, col: usize, step: usize, outputs: &StepOutputs) {
        self.cells.push((row, col, step, *outputs));
    }

    fn record_outlet_discharge(&mut self, outlet_row: usize, outlet_col: usize, step: usize, discharge_m3_h: f64) {
        self.outlet_discharge.push((outlet_row, outlet_col, step, discharge_m3_h));
    }
}

/// Writes one outlet's discharge time series to a whitespace-delimited text file, the form §6
/// describes: a header line, then one row per time step.
pub struct CsvOutletWriter {
    writer: Writer<std::fs::File>,
}

impl CsvOutletWriter {
    pub fn create(destination: &Path) -> Result<Self, OutputIoError> {
        let mut writer = Writer::from_path(destination).map_err(OutputIoError::from)?;
        writer.write_record(["step", "Q_Channel_m3_h"]).map_err(OutputIoError::from)?;
        Ok(CsvOutletWriter { writer })
    }

    pub fn write_step(&mut self, step: usize, discharge_m3_h: f64) -> Result<(), OutputIoError> {
        self.writer
            .write_record([step.to_string(), discharge_m3_h.to_string()])
            .map_err(OutputIoError::from)?;
        self.writer.flush().map_err(OutputIoError::from)
    }
}
