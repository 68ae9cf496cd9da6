use std::{io, time::Duration};

use tracing::{Instrument as _, debug, info_span};

use crate::geometry::MirrorChannels;
use crate::hardware::{Actuator, step_and_wait, wait_until_stopped};
use crate::models::{AxisId, Mirror, StepCommand};

/// Drives the given mirrors' axes one after another, waiting for each to stop.
pub(crate) async fn drive(
    actuator: &dyn Actuator,
    channels: &MirrorChannels,
    commands: &StepCommand,
    mirrors: &[Mirror],
    poll: Duration,
) -> io::Result<()> {
    for &mirror in mirrors {
        let span = info_span!("drive", %mirror);
        async {
            actuator.select_channel(channels.channel(mirror)).await?;
            for (axis, count) in commands.for_mirror(mirror) {
                debug!(?axis, count, "Stepping");
                step_and_wait(actuator, axis, count, poll).await?;
            }
            Ok::<_, io::Error>(())
        }
        .instrument(span)
        .await?;
    }
    Ok(())
}

/// Homes SY1 axis 1, SY1 axis 2, SY2 axis 1, SY2 axis 2, then reselects the previous channel.
pub(crate) async fn home_all(actuator: &dyn Actuator, channels: &MirrorChannels, poll: Duration) -> io::Result<()> {
    let previous = actuator.current_channel().await?;

    for mirror in Mirror::ALL {
        actuator.select_channel(channels.channel(mirror)).await?;
        for axis in AxisId::ALL {
            debug!(%mirror, ?axis, "Homing");
            actuator.home_axis(axis).await?;
            wait_until_stopped(actuator, axis, poll).await?;
        }
    }

    actuator.select_channel(previous).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{Call, MockActuator};

    #[tokio::test(start_paused = true)]
    async fn drives_axes_in_mirror_order() {
        let actuator = MockActuator::new();
        let commands = StepCommand {
            m1_axis1: 3,
            m1_axis2: -4,
            m2_axis1: 0,
            m2_axis2: 5,
        };

        drive(
            &actuator,
            &MirrorChannels::default(),
            &commands,
            &Mirror::ALL,
            Duration::from_millis(500),
        )
        .await
        .unwrap();

        assert_eq!(
            actuator.calls(),
            vec![
                Call::SelectChannel(1),
                Call::Step { channel: 1, axis: AxisId::One, count: 3 },
                Call::Step { channel: 1, axis: AxisId::Two, count: -4 },
                Call::SelectChannel(2),
                Call::Step { channel: 2, axis: AxisId::Two, count: 5 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn home_all_restores_channel() {
        let actuator = MockActuator::new();
        actuator.select_channel(2).await.unwrap();

        home_all(&actuator, &MirrorChannels::default(), Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(
            actuator.homes(),
            vec![
                (1, AxisId::One),
                (1, AxisId::Two),
                (2, AxisId::One),
                (2, AxisId::Two),
            ]
        );
        assert_eq!(actuator.channel(), 2);
    }
}
