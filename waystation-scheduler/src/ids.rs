//! Arena index types for every scheduler entity.

use crate::define_id;

define_id!(EntryId);
define_id!(PeerId);
define_id!(JobId);
define_id!(MessageId);
define_id!(DestId);
define_id!(TransportId);
