//! Display timings.
//!
//! The head generates CRT-style timings from the porches, sync widths and
//! active area; the reference-to-sync offsets are derived here so the
//! programmed mode satisfies the controller's seven timing rules.

use bootcore::{Error, Result, TimingConstraint};

/// One display mode. Horizontal values are pixels, vertical values lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode {
    /// Pixel clock in Hz.
    pub pclk: u32,
    pub h_ref_to_sync: u32,
    pub v_ref_to_sync: u32,
    pub h_sync_width: u32,
    pub v_sync_width: u32,
    pub h_back_porch: u32,
    pub v_back_porch: u32,
    pub h_active: u32,
    pub v_active: u32,
    pub h_front_porch: u32,
    pub v_front_porch: u32,
}

fn violated(c: TimingConstraint) -> Error {
    log::debug!("display timing constraint {} failed", c.number());
    Error::Timing(c)
}

impl Mode {
    /// Smallest horizontal reference-to-sync offset keeping the horizontal
    /// blank wide enough, rounded up to even when the front porch allows.
    pub fn compute_h_ref_to_sync(&mut self) -> Result<()> {
        let (sw, bp) = (self.h_sync_width as i64, self.h_back_porch as i64);
        let mut a: i64 = 0;
        let b = self.h_front_porch as i64 - 1;

        if a + sw + bp <= 11 {
            a = 1 + 11 - sw - bp;
        }
        if a > b {
            return Err(violated(TimingConstraint::HorizontalBlank));
        }
        if sw < 1 {
            return Err(violated(TimingConstraint::SyncWidth));
        }
        if self.h_active < 16 {
            return Err(violated(TimingConstraint::ActiveArea));
        }

        let a = if b > a && a % 2 == 1 { a + 1 } else { a };
        self.h_ref_to_sync = a as u32;
        Ok(())
    }

    /// Vertical reference-to-sync offset: as late as the front porch allows.
    pub fn compute_v_ref_to_sync(&mut self) -> Result<()> {
        let (sw, bp) = (self.v_sync_width as i64, self.v_back_porch as i64);
        let fp = self.v_front_porch as i64;
        let mut a = fp - 1;

        if a + sw + bp <= 1 {
            a = 1 + 1 - sw - bp;
        }
        if fp < a + 1 {
            a = fp - 1;
        }
        if sw < 1 {
            return Err(violated(TimingConstraint::SyncWidth));
        }
        if self.v_active < 16 {
            return Err(violated(TimingConstraint::ActiveArea));
        }

        self.v_ref_to_sync = a.max(0) as u32;
        Ok(())
    }

    /// Validate the mode against timing rules 1 to 7.
    pub fn check_timing_constraints(&self) -> Result<()> {
        let m = self;
        if m.h_ref_to_sync + m.h_sync_width + m.h_back_porch <= 20 {
            return Err(violated(TimingConstraint::HorizontalBlank));
        }
        if m.v_ref_to_sync + m.v_sync_width + m.v_back_porch <= 1 {
            return Err(violated(TimingConstraint::VerticalRefBlank));
        }
        if m.v_front_porch + m.v_sync_width + m.v_back_porch <= 1 {
            return Err(violated(TimingConstraint::VerticalBlank));
        }
        if m.v_sync_width < 1 || m.h_sync_width < 1 {
            return Err(violated(TimingConstraint::SyncWidth));
        }
        if m.v_ref_to_sync < 1 {
            return Err(violated(TimingConstraint::RefToSync));
        }
        if m.v_front_porch < m.v_ref_to_sync + 1 || m.h_front_porch < m.h_ref_to_sync + 1 {
            return Err(violated(TimingConstraint::FrontPorch));
        }
        if m.h_active < 16 || m.v_active < 16 {
            return Err(violated(TimingConstraint::ActiveArea));
        }
        Ok(())
    }

    /// Pixel clock in kHz.
    pub fn pclk_khz(&self) -> u32 {
        self.pclk / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode_1080p() -> Mode {
        Mode {
            pclk: 148_500_000,
            h_active: 1920,
            h_front_porch: 88,
            h_sync_width: 44,
            h_back_porch: 148,
            v_active: 1080,
            v_front_porch: 4,
            v_sync_width: 5,
            v_back_porch: 36,
            ..Mode::default()
        }
    }

    #[test]
    fn cea_1080p_passes() {
        let mut m = mode_1080p();
        m.compute_h_ref_to_sync().unwrap();
        m.compute_v_ref_to_sync().unwrap();
        assert_eq!((m.h_ref_to_sync, m.v_ref_to_sync), (0, 3));
        assert_eq!(m.check_timing_constraints(), Ok(()));
        assert_eq!(m.pclk_khz(), 148_500);
    }

    #[test]
    fn narrow_blank_rounds_ref_to_sync_even() {
        let mut m = Mode {
            h_sync_width: 4,
            h_back_porch: 5,
            h_front_porch: 10,
            ..mode_1080p()
        };
        m.compute_h_ref_to_sync().unwrap();
        assert_eq!(m.h_ref_to_sync, 4);
        // Still too narrow for the programmed blank.
        assert_eq!(
            m.check_timing_constraints(),
            Err(Error::Timing(TimingConstraint::HorizontalBlank))
        );

        m.h_front_porch = 3;
        assert_eq!(
            m.compute_h_ref_to_sync(),
            Err(Error::Timing(TimingConstraint::HorizontalBlank))
        );
    }

    #[test]
    fn sync_width_and_active_area() {
        let mut m = Mode { h_sync_width: 0, h_back_porch: 40, ..mode_1080p() };
        assert_eq!(m.compute_h_ref_to_sync(), Err(Error::Timing(TimingConstraint::SyncWidth)));

        let mut m = Mode { v_active: 8, ..mode_1080p() };
        assert_eq!(m.compute_v_ref_to_sync(), Err(Error::Timing(TimingConstraint::ActiveArea)));
    }

    #[test]
    fn each_rule_reports_its_number() {
        let mut base = mode_1080p();
        base.compute_h_ref_to_sync().unwrap();
        base.compute_v_ref_to_sync().unwrap();

        let m = Mode { v_ref_to_sync: 0, v_sync_width: 1, v_back_porch: 0, ..base };
        assert_eq!(m.check_timing_constraints(), Err(Error::Timing(TimingConstraint::VerticalRefBlank)));

        let m = Mode { v_ref_to_sync: 0, ..base };
        assert_eq!(m.check_timing_constraints(), Err(Error::Timing(TimingConstraint::RefToSync)));

        let m = Mode { v_front_porch: 3, ..base };
        assert_eq!(m.check_timing_constraints(), Err(Error::Timing(TimingConstraint::FrontPorch)));

        let m = Mode { v_front_porch: 0, v_sync_width: 1, v_back_porch: 0, v_ref_to_sync: 1, ..base };
        assert_eq!(m.check_timing_constraints(), Err(Error::Timing(TimingConstraint::VerticalBlank)));

        let m = Mode { h_active: 15, ..base };
        assert_eq!(m.check_timing_constraints(), Err(Error::Timing(TimingConstraint::ActiveArea)));
    }

    #[test]
    fn zero_front_porch_clamps_vertical_offset() {
        let mut m = Mode { v_front_porch: 0, ..mode_1080p() };
        m.compute_v_ref_to_sync().unwrap();
        assert_eq!(m.v_ref_to_sync, 0);
        assert!(m.check_timing_constraints().is_err());
    }
}
