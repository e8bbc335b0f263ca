//! 单元测试共用的卡牌目录与对局构造。

use std::sync::Arc;

use super::ability::{AbilityDef, AbilityTarget, AbilityTrigger, Condition, OwnerRelation};
use super::catalog::{CardDef, CardSubType, CardType, Catalog, Element, ElementalAffinity};
use super::config::GameplaySettings;
use super::effects::AbilityEffect;
use super::engine::GameLogic;
use super::queue::ResolveMode;
use super::state::{Card, CardStat, CardUid, Game, GamePhase, MatchState, PlayerId, Slot, Zone};
use super::status::StatusType;

fn unit(id: &str, attack: i32, hp: i32) -> CardDef {
    CardDef::new(id, CardType::Character).with_stats(attack, hp).with_agility(2)
}

fn damage(amount: i32) -> AbilityEffect {
    AbilityEffect::Damage {
        amount,
        element: None,
        element2: None,
    }
}

pub(crate) fn catalog() -> Catalog {
    Catalog::new()
        .with_card(unit("grunt", 2, 3).with_mana(1))
        .with_card(unit("brute", 5, 6).with_mana(2))
        .with_card(unit("squishy", 1, 4).with_mana(1))
        .with_card(
            unit("wall", 1, 10)
                .with_defense(1)
                .with_affinity(Element::Frost, ElementalAffinity::Resist)
                .with_affinity(Element::Infernal, ElementalAffinity::Void),
        )
        .with_card(unit("ogre", 4, 8).with_mana(5))
        .with_card(unit("lord", 2, 5).with_trait("dark_lord"))
        .with_card(unit("squire", 1, 3).with_trait("vassal"))
        .with_card(unit("banner", 0, 4).with_ability("banner_aura"))
        .with_card(unit("guard", 1, 5).with_ability("guard_stance"))
        .with_card(unit("healer", 1, 5).with_ability("mend").with_ability("healer_pulse"))
        .with_card(unit("sniper", 1, 3).with_ability("snipe"))
        .with_card(unit("oracle", 0, 3).with_ability("omen"))
        .with_card(unit("champion", 2, 20).with_ability("champion_might"))
        .with_card(unit("summoner", 1, 5).with_subtype(CardSubType::Summoner))
        .with_card(unit("chimera", 4, 6).with_subtype(CardSubType::Fusion))
        .with_card(CardDef::new("sword", CardType::Equipment).with_mana(1).with_stats(1, 2))
        .with_card(CardDef::new("trap", CardType::Secret).with_mana(1).with_ability("trap_sting"))
        .with_card(CardDef::new("bolt", CardType::Spell).with_mana(1).with_subtype(CardSubType::Spell))
        .with_card(CardDef::new("potion", CardType::Spell).with_subtype(CardSubType::Item))
        .with_card(CardDef::new("blessing", CardType::Spell).with_subtype(CardSubType::Miracle))
        .with_ability(
            AbilityDef::new("banner_aura", AbilityTrigger::Ongoing, AbilityTarget::AllCardsBoard)
                .with_target_condition(Condition::Owner {
                    relation: OwnerRelation::Ally,
                })
                .with_effect(AbilityEffect::AddStat {
                    stat: CardStat::Attack,
                    amount: 1,
                }),
        )
        .with_ability(
            AbilityDef::new("champion_might", AbilityTrigger::Ongoing, AbilityTarget::CharacterSelf).with_effect(
                AbilityEffect::AddStat {
                    stat: CardStat::Attack,
                    amount: 1,
                },
            ),
        )
        .with_ability(
            AbilityDef::new("guard_stance", AbilityTrigger::Ongoing, AbilityTarget::CharacterSelf).with_effect(
                AbilityEffect::AddStatus {
                    status: StatusType::Protection,
                    value: 0,
                    duration: 0,
                },
            ),
        )
        .with_ability(
            AbilityDef::new("trap_sting", AbilityTrigger::OnBeforeAttack, AbilityTarget::AbilityTriggerer)
                .with_effect(damage(1)),
        )
        .with_ability(
            AbilityDef::new("healer_pulse", AbilityTrigger::StartOfTurn, AbilityTarget::CharacterSelf)
                .with_effect(AbilityEffect::Heal { amount: 1 }),
        )
        .with_ability(
            AbilityDef::new("mend", AbilityTrigger::Activate, AbilityTarget::CharacterSelf)
                .with_effect(AbilityEffect::Heal { amount: 2 })
                .with_chain("mend_draw"),
        )
        .with_ability(
            AbilityDef::new("mend_draw", AbilityTrigger::None, AbilityTarget::PlayerSelf)
                .with_effect(AbilityEffect::Draw { count: 1 }),
        )
        .with_ability(AbilityDef::new("snipe", AbilityTrigger::Activate, AbilityTarget::SelectTarget).with_effect(damage(2)))
        .with_ability(
            AbilityDef::new("omen", AbilityTrigger::Activate, AbilityTarget::ChoiceSelector)
                .with_chain("omen_mana")
                .with_chain("omen_draw"),
        )
        .with_ability(
            AbilityDef::new("omen_mana", AbilityTrigger::None, AbilityTarget::PlayerSelf)
                .with_effect(AbilityEffect::GainMana { amount: 2 }),
        )
        .with_ability(
            AbilityDef::new("omen_draw", AbilityTrigger::None, AbilityTarget::PlayerSelf)
                .with_effect(AbilityEffect::Draw { count: 1 }),
        )
}

fn ready(game: &mut Game, mana: i32) {
    game.state = MatchState::Play;
    game.phase = GamePhase::Main;
    game.first_player = 0;
    game.current_player = 0;
    game.turn_count = 1;
    for player in game.players.iter_mut() {
        player.hp_max = 20;
        player.hp = 20;
        player.mana_max = mana;
        player.mana = mana;
        player.init_actions(1, 1);
    }
}

/// 已在主阶段的两人对局，玩家 0 行动，双方 3 点法力。
pub(crate) fn started_game() -> Game {
    let mut game = Game::new("test", 2);
    ready(&mut game, 3);
    game
}

pub(crate) fn logic_with_mode(mode: ResolveMode) -> GameLogic {
    let settings = GameplaySettings::default().with_seed(7);
    let mut logic = GameLogic::new(Arc::new(catalog()), settings, mode);
    ready(logic.game_mut(), 5);
    logic
}

/// 即时模式，双方 5 点法力。
pub(crate) fn logic() -> GameLogic {
    logic_with_mode(ResolveMode::Instant)
}

fn create(game: &mut Game, catalog: &Catalog, id: &str, player: PlayerId) -> Card {
    let def = catalog.card(id).expect("fixture card should exist");
    let uid = game.alloc_uid();
    Card::create(&def, "", player, uid)
}

/// 直接放上场并刷新动作，跳过出牌流程。
pub(crate) fn place(game: &mut Game, catalog: &Catalog, id: &str, player: PlayerId, x: i8) -> CardUid {
    let mut card = create(game, catalog, id, player);
    card.slot = Some(Slot::board(x, player));
    card.refresh();
    let uid = card.uid;
    game.get_player_mut(player).expect("fixture player").add_card(Zone::Board, card);
    uid
}

pub(crate) fn put(game: &mut Game, catalog: &Catalog, id: &str, player: PlayerId, zone: Zone) -> CardUid {
    let card = create(game, catalog, id, player);
    let uid = card.uid;
    game.get_player_mut(player).expect("fixture player").add_card(zone, card);
    uid
}
