pub mod ensemble;
pub mod fic;
pub mod fig0;
pub mod fig1;
pub mod tables;

pub use ensemble::{Ensemble, Label, Service, Subchannel};
pub use fic::{FicCarousel, FigEncoder, FillResult, Priority, RepetitionClass};
